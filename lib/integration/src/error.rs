//! Error types for the integration crate.
//!
//! Errors are designed for layered context:
//! - `ConnectorError`: Errors from connector operations
//! - `RegistryError`: Registry misuse (programming errors)
//! - `StoreError`: Errors from credential storage
//! - `IntegrationError`: Orchestrator-level wrapper that annotates lower
//!   errors with session/provider context before re-raising
//!
//! Retryability is a property of the error: only rate limiting and
//! deadline expiry are retryable; everything else is terminal for the
//! call that produced it.

use crate::session::SessionError;
use patchbay_core::{OwnerId, ProviderId, SessionId};
use std::fmt;

/// Errors from connector operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Caller input was malformed (missing or invalid fields).
    Validation { fields: Vec<String> },
    /// Credential rejected, expired, or the handshake was refused upstream.
    Auth { reason: String },
    /// The provider signalled throttling.
    RateLimited { retry_after_secs: Option<u64> },
    /// The caller-supplied deadline was exceeded.
    Timeout,
    /// Provider returned something the connector could not interpret.
    Protocol { reason: String },
}

impl ConnectorError {
    /// Creates a validation error for a set of missing/invalid field keys.
    #[must_use]
    pub fn validation(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Validation {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates an authentication error.
    #[must_use]
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    /// Creates a protocol error.
    #[must_use]
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Returns true if a caller may retry the operation with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout)
    }
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { fields } => {
                write!(f, "invalid input, fields: {}", fields.join(", "))
            }
            Self::Auth { reason } => {
                write!(f, "authentication failed: {reason}")
            }
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::Timeout => write!(f, "operation deadline exceeded"),
            Self::Protocol { reason } => {
                write!(f, "protocol error: {reason}")
            }
        }
    }
}

impl std::error::Error for ConnectorError {}

/// Errors from registry operations.
///
/// Both variants indicate misuse of the registry by the host application
/// and are considered fatal programming errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A connector is already registered under this provider ID.
    Conflict { provider_id: ProviderId },
    /// No connector is registered under this provider ID.
    NotFound { provider_id: ProviderId },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { provider_id } => {
                write!(f, "provider already registered: {provider_id}")
            }
            Self::NotFound { provider_id } => {
                write!(f, "provider not registered: {provider_id}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors from credential storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store failed.
    Storage { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage { reason } => {
                write!(f, "credential storage failed: {reason}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Orchestrator-level errors.
///
/// Provider-level errors are never swallowed; the orchestrator wraps them
/// here to annotate them with session and provider context before
/// re-raising.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationError {
    /// A connector operation failed.
    Connector {
        provider_id: ProviderId,
        session_id: Option<SessionId>,
        source: ConnectorError,
    },
    /// Registry misuse.
    Registry(RegistryError),
    /// Session state machine misuse or contention.
    Session(SessionError),
    /// Credential storage failed.
    Store(StoreError),
    /// No active credential exists for this provider/owner pair.
    NoCredential {
        provider_id: ProviderId,
        owner_id: OwnerId,
    },
}

impl IntegrationError {
    /// Wraps a connector error with provider and session context.
    #[must_use]
    pub fn connector(
        provider_id: ProviderId,
        session_id: Option<SessionId>,
        source: ConnectorError,
    ) -> Self {
        Self::Connector {
            provider_id,
            session_id,
            source,
        }
    }

    /// Returns true if a caller may retry the operation with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connector { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

impl fmt::Display for IntegrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connector {
                provider_id,
                session_id,
                source,
            } => {
                if let Some(session_id) = session_id {
                    write!(
                        f,
                        "connector '{provider_id}' failed for {session_id}: {source}"
                    )
                } else {
                    write!(f, "connector '{provider_id}' failed: {source}")
                }
            }
            Self::Registry(err) => write!(f, "{err}"),
            Self::Session(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::NoCredential {
                provider_id,
                owner_id,
            } => {
                write!(f, "no active credential for {provider_id}/{owner_id}")
            }
        }
    }
}

impl std::error::Error for IntegrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connector { source, .. } => Some(source),
            Self::Registry(err) => Some(err),
            Self::Session(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::NoCredential { .. } => None,
        }
    }
}

impl From<RegistryError> for IntegrationError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

impl From<SessionError> for IntegrationError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<StoreError> for IntegrationError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_fields() {
        let err = ConnectorError::validation(["api_key", "base_id"]);
        let message = err.to_string();
        assert!(message.contains("api_key"));
        assert!(message.contains("base_id"));
    }

    #[test]
    fn rate_limited_display_includes_retry_hint() {
        let err = ConnectorError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn retryability_classification() {
        assert!(ConnectorError::Timeout.is_retryable());
        assert!(
            ConnectorError::RateLimited {
                retry_after_secs: None
            }
            .is_retryable()
        );
        assert!(!ConnectorError::auth("expired").is_retryable());
        assert!(!ConnectorError::validation(["key"]).is_retryable());
    }

    #[test]
    fn integration_error_annotates_context() {
        let session_id = SessionId::new();
        let err = IntegrationError::connector(
            ProviderId::from("hubspot"),
            Some(session_id),
            ConnectorError::auth("token revoked"),
        );
        let message = err.to_string();
        assert!(message.contains("hubspot"));
        assert!(message.contains(&session_id.to_string()));
        assert!(message.contains("token revoked"));
    }

    #[test]
    fn integration_error_retryability_delegates_to_source() {
        let retryable = IntegrationError::connector(
            ProviderId::from("notion"),
            None,
            ConnectorError::Timeout,
        );
        assert!(retryable.is_retryable());

        let fatal = IntegrationError::Registry(RegistryError::NotFound {
            provider_id: ProviderId::from("notion"),
        });
        assert!(!fatal.is_retryable());
    }
}
