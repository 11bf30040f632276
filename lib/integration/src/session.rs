//! Integration session state machine.
//!
//! A session is a single, time-bounded attempt to establish a credential
//! for one provider/owner pair:
//!
//! ```text
//! Created -> AwaitingInput -> AwaitingCallback -> Validating -> Active
//!                          \__________________/^
//! ```
//!
//! `Failed` is reachable from every non-terminal state. `Active` and
//! `Failed` are terminal; a new attempt requires a new session.

use crate::connector::AuthChallenge;
use chrono::{DateTime, Utc};
use patchbay_core::{OwnerId, ProviderId, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of an integration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session exists but the descriptor has not been presented yet.
    Created,
    /// Waiting for user-supplied configuration input.
    AwaitingInput,
    /// A redirect-based handshake is pending its callback.
    AwaitingCallback,
    /// A credential was obtained and is being checked upstream.
    Validating,
    /// Terminal success: credential validated and persisted.
    Active,
    /// Terminal failure or cancellation.
    Failed,
}

impl SessionState {
    /// Returns true if no transitions leave this state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Active | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::AwaitingInput => "awaiting_input",
            Self::AwaitingCallback => "awaiting_callback",
            Self::Validating => "validating",
            Self::Active => "active",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Errors from session operations.
///
/// These carry StateError semantics: an operation was invoked against a
/// session in the wrong state, which is a caller bug surfaced immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The requested transition is not allowed from the current state.
    InvalidTransition {
        session_id: SessionId,
        from: SessionState,
        to: SessionState,
    },
    /// The session is already in a terminal state.
    Terminal {
        session_id: SessionId,
        state: SessionState,
    },
    /// No session exists under this ID.
    NotFound { session_id: SessionId },
    /// Another operation is advancing this session concurrently.
    Busy { session_id: SessionId },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition {
                session_id,
                from,
                to,
            } => {
                write!(
                    f,
                    "invalid transition for {session_id}: {from} -> {to}"
                )
            }
            Self::Terminal { session_id, state } => {
                write!(f, "session {session_id} is terminal ({state})")
            }
            Self::NotFound { session_id } => {
                write!(f, "session not found: {session_id}")
            }
            Self::Busy { session_id } => {
                write!(f, "session {session_id} is being advanced concurrently")
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// A single connection attempt for one provider/owner pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationSession {
    /// Unique session identifier.
    pub id: SessionId,
    /// The provider being connected.
    pub provider_id: ProviderId,
    /// The owner the connection is on behalf of.
    pub owner_id: OwnerId,
    /// Current state.
    pub state: SessionState,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// The error that moved the session to `Failed`, if it did.
    pub last_error: Option<String>,
    /// Pending handshake while in `AwaitingCallback`.
    challenge: Option<AuthChallenge>,
}

impl IntegrationSession {
    /// Creates a new session in the `Created` state.
    #[must_use]
    pub fn new(provider_id: ProviderId, owner_id: OwnerId) -> Self {
        Self {
            id: SessionId::new(),
            provider_id,
            owner_id,
            state: SessionState::Created,
            created_at: Utc::now(),
            last_error: None,
            challenge: None,
        }
    }

    /// Returns the pending handshake, if any.
    #[must_use]
    pub fn challenge(&self) -> Option<&AuthChallenge> {
        self.challenge.as_ref()
    }

    /// Marks the descriptor as presented: `Created -> AwaitingInput`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the session is not in `Created`.
    pub fn mark_awaiting_input(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Created, SessionState::AwaitingInput)
    }

    /// Records a pending handshake: `AwaitingInput -> AwaitingCallback`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the session is not in `AwaitingInput`.
    pub fn await_callback(&mut self, challenge: AuthChallenge) -> Result<(), SessionError> {
        self.transition(SessionState::AwaitingInput, SessionState::AwaitingCallback)?;
        self.challenge = Some(challenge);
        Ok(())
    }

    /// Begins credential validation:
    /// `AwaitingInput | AwaitingCallback -> Validating`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the session is in any other state.
    pub fn start_validation(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::AwaitingInput | SessionState::AwaitingCallback => {
                self.state = SessionState::Validating;
                self.challenge = None;
                Ok(())
            }
            from => Err(self.rejected(from, SessionState::Validating)),
        }
    }

    /// Completes the session successfully: `Validating -> Active`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the session is not in `Validating`.
    pub fn activate(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Validating, SessionState::Active)
    }

    /// Fails the session from any non-terminal state, recording the
    /// triggering error.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Terminal` if the session has already
    /// reached `Active` or `Failed`.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Err(SessionError::Terminal {
                session_id: self.id,
                state: self.state,
            });
        }
        self.state = SessionState::Failed;
        self.last_error = Some(reason.into());
        self.challenge = None;
        Ok(())
    }

    /// Cancels the session; equivalent to failing with a cancellation note.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Terminal` if the session has already
    /// reached `Active` or `Failed`.
    pub fn cancel(&mut self) -> Result<(), SessionError> {
        self.fail("cancelled by caller")
    }

    fn transition(&mut self, from: SessionState, to: SessionState) -> Result<(), SessionError> {
        if self.state != from {
            return Err(self.rejected(self.state, to));
        }
        self.state = to;
        Ok(())
    }

    fn rejected(&self, from: SessionState, to: SessionState) -> SessionError {
        if from.is_terminal() {
            SessionError::Terminal {
                session_id: self.id,
                state: from,
            }
        } else {
            SessionError::InvalidTransition {
                session_id: self.id,
                from,
                to,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session() -> IntegrationSession {
        IntegrationSession::new(ProviderId::from("hubspot"), OwnerId::from("user1"))
    }

    fn challenge() -> AuthChallenge {
        AuthChallenge {
            provider_id: ProviderId::from("hubspot"),
            owner_id: OwnerId::from("user1"),
            authorize_url: "https://app.hubspot.com/oauth/authorize?x=y".to_string(),
            correlation_token: "tok".to_string(),
            pkce_verifier: None,
            expires_at: Utc::now() + Duration::minutes(10),
        }
    }

    #[test]
    fn redirect_path_walks_all_states() {
        let mut session = session();
        assert_eq!(session.state, SessionState::Created);

        session.mark_awaiting_input().expect("to awaiting_input");
        session.await_callback(challenge()).expect("to awaiting_callback");
        assert!(session.challenge().is_some());

        session.start_validation().expect("to validating");
        assert!(session.challenge().is_none());

        session.activate().expect("to active");
        assert_eq!(session.state, SessionState::Active);
        assert!(session.state.is_terminal());
    }

    #[test]
    fn direct_credential_path_skips_callback() {
        let mut session = session();
        session.mark_awaiting_input().expect("to awaiting_input");
        session.start_validation().expect("to validating");
        session.activate().expect("to active");
    }

    #[test]
    fn fail_records_last_error() {
        let mut session = session();
        session.mark_awaiting_input().expect("to awaiting_input");
        session.fail("credential validation failed").expect("fail");

        assert_eq!(session.state, SessionState::Failed);
        assert_eq!(
            session.last_error.as_deref(),
            Some("credential validation failed")
        );
    }

    #[test]
    fn terminal_states_admit_no_transitions() {
        let mut active = session();
        active.mark_awaiting_input().expect("to awaiting_input");
        active.start_validation().expect("to validating");
        active.activate().expect("to active");

        assert!(matches!(
            active.start_validation(),
            Err(SessionError::Terminal { .. })
        ));
        assert!(matches!(active.fail("late"), Err(SessionError::Terminal { .. })));

        let mut failed = session();
        failed.fail("boom").expect("fail");
        assert!(matches!(failed.activate(), Err(SessionError::Terminal { .. })));
        assert!(matches!(failed.cancel(), Err(SessionError::Terminal { .. })));
    }

    #[test]
    fn out_of_order_transitions_are_rejected() {
        let mut session = session();

        // Cannot validate before input was requested
        let err = session.start_validation().unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));

        // Cannot activate before validating
        session.mark_awaiting_input().expect("to awaiting_input");
        assert!(matches!(
            session.activate(),
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn cancel_from_any_non_terminal_state() {
        let mut created = session();
        created.cancel().expect("cancel from created");
        assert_eq!(created.state, SessionState::Failed);
        assert!(created.last_error.is_some());

        let mut awaiting = session();
        awaiting.mark_awaiting_input().expect("to awaiting_input");
        awaiting.await_callback(challenge()).expect("to awaiting_callback");
        awaiting.cancel().expect("cancel from awaiting_callback");
        assert_eq!(awaiting.state, SessionState::Failed);
        assert!(awaiting.challenge().is_none());
    }

    #[test]
    fn session_serde_roundtrip() {
        let mut session = session();
        session.mark_awaiting_input().expect("to awaiting_input");

        let json = serde_json::to_string(&session).expect("serialize");
        let parsed: IntegrationSession = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(session.id, parsed.id);
        assert_eq!(parsed.state, SessionState::AwaitingInput);
    }
}
