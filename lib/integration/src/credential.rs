//! Credentials and the credential store.
//!
//! A credential is the durable output of a successfully terminated
//! session. The store owns every credential exclusively; connectors only
//! borrow one for the duration of a single operation. At most one active
//! credential exists per (provider, owner) pair.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use patchbay_core::{OwnerId, ProviderId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Secret material proving authorization against a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecretMaterial {
    /// API key.
    ApiKey { key: String },
    /// OAuth 2.0 tokens.
    Oauth2 {
        access_token: String,
        refresh_token: Option<String>,
        token_type: String,
        scope: Option<String>,
    },
}

impl SecretMaterial {
    /// Creates API key material.
    #[must_use]
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey { key: key.into() }
    }

    /// Creates OAuth2 material with a bearer token type.
    #[must_use]
    pub fn oauth2(access_token: impl Into<String>) -> Self {
        Self::Oauth2 {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: "Bearer".to_string(),
            scope: None,
        }
    }

    /// Returns the token to present as a bearer credential.
    #[must_use]
    pub fn bearer_token(&self) -> &str {
        match self {
            Self::ApiKey { key } => key,
            Self::Oauth2 { access_token, .. } => access_token,
        }
    }
}

/// A credential for one (provider, owner) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// The provider this credential authorizes against.
    pub provider_id: ProviderId,
    /// The owner on whose behalf it was obtained.
    pub owner_id: OwnerId,
    /// The secret material.
    pub material: SecretMaterial,
    /// When the credential was obtained.
    pub obtained_at: DateTime<Utc>,
    /// When the credential expires, if the provider told us.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Creates a new credential obtained now, with no known expiry.
    #[must_use]
    pub fn new(provider_id: ProviderId, owner_id: OwnerId, material: SecretMaterial) -> Self {
        Self {
            provider_id,
            owner_id,
            material,
            obtained_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Sets the expiry timestamp.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns true if the credential has a known expiry in the past.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at < Utc::now())
    }
}

/// Trait for durable credential storage keyed by (provider, owner).
///
/// Implementations must make `save` atomic with respect to invalidating
/// the prior entry: two concurrent authentications for the same pair must
/// never leave two active credentials visible.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Upserts a credential, superseding any prior entry for the same
    /// (provider, owner) pair.
    async fn save(&self, credential: Credential) -> Result<(), StoreError>;

    /// Loads the active credential for a (provider, owner) pair.
    async fn load(
        &self,
        provider_id: &ProviderId,
        owner_id: &OwnerId,
    ) -> Result<Option<Credential>, StoreError>;

    /// Revokes the credential for a (provider, owner) pair.
    ///
    /// Idempotent: revoking an absent credential is a no-op.
    async fn revoke(&self, provider_id: &ProviderId, owner_id: &OwnerId)
    -> Result<(), StoreError>;
}

/// In-memory credential store.
///
/// A single write lock makes the supersede-and-insert step atomic.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    entries: RwLock<HashMap<(ProviderId, OwnerId), Credential>>,
}

impl InMemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn save(&self, credential: Credential) -> Result<(), StoreError> {
        let key = (credential.provider_id.clone(), credential.owner_id.clone());
        let mut entries = self.entries.write().unwrap();
        entries.insert(key, credential);
        Ok(())
    }

    async fn load(
        &self,
        provider_id: &ProviderId,
        owner_id: &OwnerId,
    ) -> Result<Option<Credential>, StoreError> {
        let entries = self.entries.read().unwrap();
        Ok(entries
            .get(&(provider_id.clone(), owner_id.clone()))
            .cloned())
    }

    async fn revoke(
        &self,
        provider_id: &ProviderId,
        owner_id: &OwnerId,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap();
        entries.remove(&(provider_id.clone(), owner_id.clone()));
        Ok(())
    }
}
