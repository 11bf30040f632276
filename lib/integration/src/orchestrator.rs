//! Integration orchestrator.
//!
//! The façade the presentation layer calls. It resolves providers through
//! the registry, drives sessions through authorization, validation, and
//! activation, and persists the resulting credential in the store. The
//! presentation layer never touches connectors or the store directly.
//!
//! Concurrency: connector calls are the only suspension points. The
//! session table is never held across one; instead each session slot
//! carries an advisory busy flag claimed for the duration of a transition,
//! so a second concurrent attempt to advance the same session fails with a
//! state error rather than blocking. Results of in-flight calls for a
//! session that was cancelled meanwhile are discarded on return.

use crate::connector::{
    AuthChallenge, AuthInput, AuthOutcome, CallbackPayload, Connector, ConnectorDescriptor,
    RecordQuery, RecordStream,
};
use crate::credential::{Credential, CredentialStore};
use crate::error::{ConnectorError, IntegrationError};
use crate::registry::ConnectorRegistry;
use crate::retry::{RetryPolicy, with_retry};
use crate::session::{IntegrationSession, SessionError, SessionState};
use patchbay_core::{OwnerId, ProviderId, SessionId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline applied to each suspendable connector call.
    pub operation_timeout: Duration,
    /// Backoff policy for rate-limited record fetches.
    pub fetch_retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(30),
            fetch_retry: RetryPolicy::default(),
        }
    }
}

/// A stored session plus its advisory transition lock.
struct SessionSlot {
    session: IntegrationSession,
    busy: bool,
}

/// Façade coordinating registry, sessions, and credential store.
pub struct IntegrationOrchestrator {
    registry: ConnectorRegistry,
    store: Arc<dyn CredentialStore>,
    config: OrchestratorConfig,
    sessions: Mutex<HashMap<SessionId, SessionSlot>>,
}

impl IntegrationOrchestrator {
    /// Creates an orchestrator with default configuration.
    ///
    /// Taking the registry by value freezes it: no further registration
    /// is possible once orchestration starts.
    #[must_use]
    pub fn new(registry: ConnectorRegistry, store: Arc<dyn CredentialStore>) -> Self {
        Self::with_config(registry, store, OrchestratorConfig::default())
    }

    /// Creates an orchestrator with explicit configuration.
    #[must_use]
    pub fn with_config(
        registry: ConnectorRegistry,
        store: Arc<dyn CredentialStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the descriptors of every registered connector, in
    /// registration order.
    #[must_use]
    pub fn list_available(&self) -> Vec<ConnectorDescriptor> {
        self.registry.descriptors()
    }

    /// Returns a snapshot of a session.
    #[must_use]
    pub fn session(&self, session_id: SessionId) -> Option<IntegrationSession> {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(&session_id).map(|slot| slot.session.clone())
    }

    /// Drops finished sessions from the table, returning how many were
    /// removed.
    ///
    /// Terminal sessions are kept for inspection until pruned; hosts
    /// should call this periodically so the table does not grow without
    /// bound across connection attempts. Sessions with an in-flight
    /// transition are left alone.
    pub fn prune_finished(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, slot| slot.busy || !slot.session.state.is_terminal());
        before - sessions.len()
    }

    /// Starts a connection attempt for a provider/owner pair.
    ///
    /// For redirect-based providers the session is returned in
    /// `AwaitingCallback`, carrying the challenge the presentation layer
    /// must send the user through. For providers that mint a credential
    /// directly, the session passes through `Validating` and is returned
    /// in `Active` (credential persisted) or `Failed`.
    ///
    /// # Errors
    ///
    /// Returns `IntegrationError::Registry` for unknown providers, and a
    /// connector error annotated with session context for handshake
    /// failures. Input validation failures leave the session in
    /// `AwaitingInput`.
    #[instrument(skip(self, input), fields(provider = %provider_id, owner = %owner_id))]
    pub async fn start_connection(
        &self,
        provider_id: ProviderId,
        owner_id: OwnerId,
        input: AuthInput,
    ) -> Result<IntegrationSession, IntegrationError> {
        let connector = self.registry.resolve(&provider_id)?;

        let mut session = IntegrationSession::new(provider_id.clone(), owner_id.clone());
        session.mark_awaiting_input()?;
        let session_id = session.id;
        self.insert_slot(session);

        let outcome = self
            .with_deadline(connector.begin_auth(&owner_id, &input))
            .await;

        match outcome {
            Err(err @ ConnectorError::Validation { .. }) => {
                // Caller input problem: surface field detail, leave the
                // session in AwaitingInput rather than failing it.
                debug!(session = %session_id, error = %err, "input rejected");
                self.release_slot(session_id);
                Err(IntegrationError::connector(
                    provider_id,
                    Some(session_id),
                    err,
                ))
            }
            Err(err) => {
                warn!(session = %session_id, error = %err, "begin_auth failed");
                self.fail_slot(session_id, err.to_string());
                Err(IntegrationError::connector(
                    provider_id,
                    Some(session_id),
                    err,
                ))
            }
            Ok(AuthOutcome::Challenge(challenge)) => {
                debug!(session = %session_id, "handshake pending callback");
                let session = self.apply(session_id, |s| s.await_callback(challenge))?;
                self.release_slot(session_id);
                Ok(session)
            }
            Ok(AuthOutcome::Credential(credential)) => {
                self.apply(session_id, IntegrationSession::start_validation)?;
                self.validate_and_activate(connector.as_ref(), session_id, credential)
                    .await
            }
        }
    }

    /// Completes a pending redirect-based handshake.
    ///
    /// # Errors
    ///
    /// Returns a session error if the session is not in `AwaitingCallback`
    /// or another call is advancing it concurrently, and a connector error
    /// annotated with session context if the exchange or validation fails.
    #[instrument(skip(self, payload), fields(session = %session_id))]
    pub async fn complete_connection(
        &self,
        session_id: SessionId,
        payload: CallbackPayload,
    ) -> Result<IntegrationSession, IntegrationError> {
        let (provider_id, challenge) = self.claim_callback(session_id)?;
        let connector = match self.registry.resolve(&provider_id) {
            Ok(connector) => connector,
            Err(err) => {
                self.release_slot(session_id);
                return Err(err.into());
            }
        };

        let credential = match self
            .with_deadline(connector.complete_auth(&challenge, &payload))
            .await
        {
            Ok(credential) => credential,
            Err(err) => {
                warn!(error = %err, "complete_auth failed");
                self.fail_slot(session_id, err.to_string());
                return Err(IntegrationError::connector(
                    provider_id,
                    Some(session_id),
                    err,
                ));
            }
        };

        self.apply(session_id, IntegrationSession::start_validation)?;
        self.validate_and_activate(connector.as_ref(), session_id, credential)
            .await
    }

    /// Cancels a session from any non-terminal state.
    ///
    /// In-flight connector calls for the session are not force-aborted;
    /// their results are discarded when they return.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for unknown sessions and
    /// `SessionError::Terminal` if the session already finished.
    #[instrument(skip(self), fields(session = %session_id))]
    pub fn cancel_connection(
        &self,
        session_id: SessionId,
    ) -> Result<IntegrationSession, IntegrationError> {
        let mut sessions = self.sessions.lock().unwrap();
        let slot = sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound { session_id })?;
        slot.session.cancel()?;
        debug!("session cancelled");
        Ok(slot.session.clone())
    }

    /// Revokes the stored credential for a provider/owner pair.
    ///
    /// Idempotent: disconnecting an absent integration is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `IntegrationError::Store` if the backing store fails.
    #[instrument(skip(self), fields(provider = %provider_id, owner = %owner_id))]
    pub async fn disconnect(
        &self,
        provider_id: &ProviderId,
        owner_id: &OwnerId,
    ) -> Result<(), IntegrationError> {
        self.store.revoke(provider_id, owner_id).await?;
        Ok(())
    }

    /// Fetches records from a connected provider, retrying throttled
    /// attempts per the configured backoff policy.
    ///
    /// # Errors
    ///
    /// Returns `IntegrationError::NoCredential` when the pair has no
    /// active credential, and an auth error for expired ones.
    #[instrument(skip(self, query), fields(provider = %provider_id, owner = %owner_id))]
    pub async fn fetch_records(
        &self,
        provider_id: &ProviderId,
        owner_id: &OwnerId,
        query: RecordQuery,
    ) -> Result<RecordStream, IntegrationError> {
        let connector = self.registry.resolve(provider_id)?;
        let credential = self
            .store
            .load(provider_id, owner_id)
            .await?
            .ok_or_else(|| IntegrationError::NoCredential {
                provider_id: provider_id.clone(),
                owner_id: owner_id.clone(),
            })?;

        if credential.is_expired() {
            return Err(IntegrationError::connector(
                provider_id.clone(),
                None,
                ConnectorError::auth("credential expired"),
            ));
        }

        with_retry(&self.config.fetch_retry, || {
            self.with_deadline(connector.fetch(&credential, query.clone()))
        })
        .await
        .map_err(|err| IntegrationError::connector(provider_id.clone(), None, err))
    }

    /// Validates a freshly obtained credential and finishes the session.
    ///
    /// Expects the stored session to be in `Validating` with its busy flag
    /// claimed; always releases the flag.
    async fn validate_and_activate(
        &self,
        connector: &dyn Connector,
        session_id: SessionId,
        credential: Credential,
    ) -> Result<IntegrationSession, IntegrationError> {
        let provider_id = credential.provider_id.clone();
        let owner_id = credential.owner_id.clone();

        let valid = match self.with_deadline(connector.validate(&credential)).await {
            Ok(valid) => valid,
            Err(err) => {
                warn!(session = %session_id, error = %err, "validate failed");
                self.fail_slot(session_id, err.to_string());
                return Err(IntegrationError::connector(
                    provider_id,
                    Some(session_id),
                    err,
                ));
            }
        };

        if !valid {
            debug!(session = %session_id, "credential rejected upstream");
            return Ok(self.fail_slot(session_id, "credential validation failed"));
        }

        if let Err(err) = self.store.save(credential).await {
            self.fail_slot(session_id, err.to_string());
            return Err(err.into());
        }

        match self.apply(session_id, IntegrationSession::activate) {
            Ok(session) => {
                debug!(session = %session_id, "integration active");
                self.release_slot(session_id);
                Ok(session)
            }
            Err(err) => {
                // Cancelled while validating: discard the result.
                let _ = self.store.revoke(&provider_id, &owner_id).await;
                Err(err)
            }
        }
    }

    /// Claims an `AwaitingCallback` session for one transition.
    fn claim_callback(
        &self,
        session_id: SessionId,
    ) -> Result<(ProviderId, AuthChallenge), IntegrationError> {
        let mut sessions = self.sessions.lock().unwrap();
        let slot = sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound { session_id })?;

        if slot.busy {
            return Err(SessionError::Busy { session_id }.into());
        }
        if slot.session.state != SessionState::AwaitingCallback {
            return Err(if slot.session.state.is_terminal() {
                SessionError::Terminal {
                    session_id,
                    state: slot.session.state,
                }
            } else {
                SessionError::InvalidTransition {
                    session_id,
                    from: slot.session.state,
                    to: SessionState::Validating,
                }
            }
            .into());
        }

        let challenge = slot
            .session
            .challenge()
            .cloned()
            .ok_or(SessionError::InvalidTransition {
                session_id,
                from: slot.session.state,
                to: SessionState::Validating,
            })?;

        slot.busy = true;
        Ok((slot.session.provider_id.clone(), challenge))
    }

    /// Applies a transition to the stored session.
    ///
    /// A terminal stored state (e.g. cancelled meanwhile) rejects the
    /// transition, which is how in-flight results get discarded. The busy
    /// flag is released on rejection.
    fn apply<F>(
        &self,
        session_id: SessionId,
        transition: F,
    ) -> Result<IntegrationSession, IntegrationError>
    where
        F: FnOnce(&mut IntegrationSession) -> Result<(), SessionError>,
    {
        let mut sessions = self.sessions.lock().unwrap();
        let slot = sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound { session_id })?;
        match transition(&mut slot.session) {
            Ok(()) => Ok(slot.session.clone()),
            Err(err) => {
                slot.busy = false;
                Err(err.into())
            }
        }
    }

    fn insert_slot(&self, session: IntegrationSession) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(
            session.id,
            SessionSlot {
                session,
                busy: true,
            },
        );
    }

    /// Releases the busy flag, leaving the session state untouched.
    fn release_slot(&self, session_id: SessionId) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(slot) = sessions.get_mut(&session_id) {
            slot.busy = false;
        }
    }

    /// Fails the stored session (unless already terminal) and releases
    /// the busy flag.
    fn fail_slot(&self, session_id: SessionId, reason: impl Into<String>) -> IntegrationSession {
        let mut sessions = self.sessions.lock().unwrap();
        let slot = sessions
            .get_mut(&session_id)
            .expect("session slot exists for the duration of its transitions");
        slot.busy = false;
        if !slot.session.state.is_terminal() {
            let _ = slot.session.fail(reason);
        }
        slot.session.clone()
    }

    /// Applies the configured deadline to a suspendable connector call.
    async fn with_deadline<T>(
        &self,
        operation: impl Future<Output = Result<T, ConnectorError>>,
    ) -> Result<T, ConnectorError> {
        match tokio::time::timeout(self.config.operation_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::Timeout),
        }
    }
}
