//! Third-party integration framework.
//!
//! Connects external SaaS providers behind a uniform [`Connector`]
//! contract: a registry of available connectors, a session state machine
//! for connection attempts, a credential store for what they produce, and
//! an orchestrator façade tying the three together.

pub mod connector;
pub mod credential;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod session;

pub use connector::{
    AuthChallenge, AuthInput, AuthOutcome, CallbackPayload, Connector, ConnectorDescriptor,
    FieldKind, FieldSpec, Record, RecordQuery, RecordStream,
};
pub use credential::{Credential, CredentialStore, InMemoryCredentialStore, SecretMaterial};
pub use error::{ConnectorError, IntegrationError, RegistryError, StoreError};
pub use orchestrator::{IntegrationOrchestrator, OrchestratorConfig};
pub use registry::{ConnectorFactory, ConnectorRegistry};
pub use retry::{RetryPolicy, with_retry};
pub use session::{IntegrationSession, SessionError, SessionState};
