//! Connector trait and related types.
//!
//! All integrations implement the Connector trait, providing a uniform
//! interface for authenticating against and exchanging data with an
//! external service. Connectors are stateless business logic: one shared
//! instance serves every session for its provider.

use crate::credential::Credential;
use crate::error::ConnectorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use patchbay_core::{OwnerId, ProviderId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The kind of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Plain text (e.g. a workspace name).
    Text,
    /// Secret material (e.g. an API key); must not be echoed back.
    Secret,
    /// Satisfied by a redirect-based handshake, not typed by the user.
    OauthRedirect,
}

/// A configuration field a connector needs from the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Input key for this field.
    pub key: String,
    /// Field kind.
    pub kind: FieldKind,
    /// Whether the field must be supplied.
    pub required: bool,
}

impl FieldSpec {
    /// Creates a required field.
    #[must_use]
    pub fn required(key: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            key: key.into(),
            kind,
            required: true,
        }
    }

    /// Creates an optional field.
    #[must_use]
    pub fn optional(key: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            key: key.into(),
            kind,
            required: false,
        }
    }
}

/// Static description of a connector.
///
/// Produced once at construction and stable across calls; this is the only
/// data a presentation layer needs to render configuration prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorDescriptor {
    /// The provider this connector talks to.
    pub provider_id: ProviderId,
    /// Human-readable name.
    pub display_name: String,
    /// Configuration fields, in render order.
    pub required_fields: Vec<FieldSpec>,
}

impl ConnectorDescriptor {
    /// Checks caller input against the declared fields.
    ///
    /// Redirect fields are satisfied by the handshake itself and are not
    /// expected in the input.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Validation` naming every required field
    /// that is missing or blank.
    pub fn validate_input(&self, input: &AuthInput) -> Result<(), ConnectorError> {
        let missing: Vec<String> = self
            .required_fields
            .iter()
            .filter(|field| field.required && field.kind != FieldKind::OauthRedirect)
            .filter(|field| input.get(&field.key).is_none_or(|v| v.trim().is_empty()))
            .map(|field| field.key.clone())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConnectorError::Validation { fields: missing })
        }
    }
}

/// User-supplied configuration input, keyed by `FieldSpec::key`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthInput(HashMap<String, String>);

impl AuthInput {
    /// Creates an empty input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field value.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns the value for a field key, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// A pending redirect-based handshake.
///
/// Owned by the session that initiated it; the correlation token must be
/// echoed back unchanged by the callback for the exchange to proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChallenge {
    /// The provider that issued the challenge.
    pub provider_id: ProviderId,
    /// The owner the handshake is on behalf of.
    pub owner_id: OwnerId,
    /// URL the user's browser must visit to authorize.
    pub authorize_url: String,
    /// Opaque token correlating the callback to this challenge.
    pub correlation_token: String,
    /// PKCE verifier for providers that use it.
    pub pkce_verifier: Option<String>,
    /// When the challenge stops being honored.
    pub expires_at: DateTime<Utc>,
}

impl AuthChallenge {
    /// Returns true if the challenge has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

/// The payload delivered by the provider's redirect callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    /// Authorization code to exchange for tokens.
    pub code: String,
    /// Echoed correlation token.
    pub state: String,
    /// Provider-reported error code, if the user denied or the provider
    /// rejected the authorization.
    pub error: Option<String>,
    /// Provider-reported error detail.
    pub error_description: Option<String>,
}

/// Result of beginning authentication.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// The provider requires a redirect-based handshake.
    Challenge(AuthChallenge),
    /// The supplied input was sufficient to mint a credential directly.
    Credential(Credential),
}

/// A provider item shaped into a uniform record.
///
/// Provider response shapes are fully encapsulated behind this type;
/// nothing provider-specific escapes `fetch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Provider-side identifier.
    pub id: String,
    /// Display name, when the provider exposes one.
    pub name: Option<String>,
    /// Item kind (e.g. "contact", "base", "page").
    pub kind: String,
    /// Identifier of the containing item, if any.
    pub parent_id: Option<String>,
    /// Name or path of the containing item, if any.
    pub parent_name: Option<String>,
    /// Link to the item in the provider's UI, if any.
    pub url: Option<String>,
}

/// Query parameters for fetching records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordQuery {
    /// Restrict results to a single record kind.
    pub kind: Option<String>,
    /// Opaque pagination cursor from a prior call.
    pub cursor: Option<String>,
    /// Maximum records per page.
    pub page_size: Option<u32>,
}

impl RecordQuery {
    /// Restricts the query to a single record kind.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Resumes the query from a pagination cursor.
    #[must_use]
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

/// A finite-per-call, restartable sequence of provider records.
pub type RecordStream = BoxStream<'static, Result<Record, ConnectorError>>;

/// Trait for integration connectors.
///
/// One implementation per provider. Implementations hold no per-session
/// state and never persist credentials themselves; persistence is the
/// orchestrator's responsibility.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the static description of this connector.
    ///
    /// Pure: no side effects, structurally identical across calls.
    fn describe(&self) -> ConnectorDescriptor;

    /// Begins authentication for an owner.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Validation` if `input` is missing fields
    /// declared by [`Connector::describe`], or `ConnectorError::Auth` if
    /// the provider refuses the handshake.
    async fn begin_auth(
        &self,
        owner_id: &OwnerId,
        input: &AuthInput,
    ) -> Result<AuthOutcome, ConnectorError>;

    /// Completes a redirect-based handshake.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Auth` if the callback's correlation token
    /// does not match the challenge, the challenge has expired, or the
    /// upstream provider rejects the code exchange.
    async fn complete_auth(
        &self,
        challenge: &AuthChallenge,
        payload: &CallbackPayload,
    ) -> Result<Credential, ConnectorError>;

    /// Performs a lightweight upstream check of a credential.
    ///
    /// Read-only. Fails closed: transport problems yield `Ok(false)`
    /// rather than an error.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Validation` only for credential material
    /// this connector cannot interpret at all.
    async fn validate(&self, credential: &Credential) -> Result<bool, ConnectorError>;

    /// Fetches provider records.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Auth` for expired/revoked credentials and
    /// `ConnectorError::RateLimited` when the provider throttles; callers
    /// must treat the latter as retryable with backoff.
    async fn fetch(
        &self,
        credential: &Credential,
        query: RecordQuery,
    ) -> Result<RecordStream, ConnectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn descriptor() -> ConnectorDescriptor {
        ConnectorDescriptor {
            provider_id: ProviderId::from("airtable"),
            display_name: "Airtable".to_string(),
            required_fields: vec![
                FieldSpec::required("api_key", FieldKind::Secret),
                FieldSpec::optional("base_id", FieldKind::Text),
            ],
        }
    }

    #[test]
    fn validate_input_accepts_complete_input() {
        let input = AuthInput::new().with_field("api_key", "key_abc");
        assert!(descriptor().validate_input(&input).is_ok());
    }

    #[test]
    fn validate_input_names_missing_fields() {
        let result = descriptor().validate_input(&AuthInput::new());
        match result {
            Err(ConnectorError::Validation { fields }) => {
                assert_eq!(fields, vec!["api_key".to_string()]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn validate_input_lists_every_missing_field() {
        let descriptor = ConnectorDescriptor {
            provider_id: ProviderId::from("hubspot"),
            display_name: "HubSpot".to_string(),
            required_fields: vec![
                FieldSpec::required("client_id", FieldKind::Text),
                FieldSpec::required("client_secret", FieldKind::Secret),
            ],
        };

        let result = descriptor.validate_input(&AuthInput::new());
        match result {
            Err(ConnectorError::Validation { fields }) => {
                assert_eq!(
                    fields,
                    vec!["client_id".to_string(), "client_secret".to_string()]
                );
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn validate_input_rejects_blank_values() {
        let input = AuthInput::new().with_field("api_key", "   ");
        let result = descriptor().validate_input(&input);
        assert!(matches!(result, Err(ConnectorError::Validation { .. })));
    }

    #[test]
    fn validate_input_skips_redirect_fields() {
        let descriptor = ConnectorDescriptor {
            provider_id: ProviderId::from("hubspot"),
            display_name: "HubSpot".to_string(),
            required_fields: vec![FieldSpec::required("authorization", FieldKind::OauthRedirect)],
        };
        assert!(descriptor.validate_input(&AuthInput::new()).is_ok());
    }

    #[test]
    fn challenge_expiry() {
        let mut challenge = AuthChallenge {
            provider_id: ProviderId::from("hubspot"),
            owner_id: OwnerId::from("user1"),
            authorize_url: "https://example.com/authorize".to_string(),
            correlation_token: "tok".to_string(),
            pkce_verifier: None,
            expires_at: Utc::now() + Duration::minutes(10),
        };
        assert!(!challenge.is_expired());

        challenge.expires_at = Utc::now() - Duration::seconds(1);
        assert!(challenge.is_expired());
    }

    #[test]
    fn descriptor_serde_roundtrip() {
        let descriptor = descriptor();
        let json = serde_json::to_string(&descriptor).expect("serialize");
        let parsed: ConnectorDescriptor = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(descriptor, parsed);
    }

    #[test]
    fn record_query_builder() {
        let query = RecordQuery::default()
            .with_kind("contact")
            .with_cursor("after_123");
        assert_eq!(query.kind.as_deref(), Some("contact"));
        assert_eq!(query.cursor.as_deref(), Some("after_123"));
    }
}
