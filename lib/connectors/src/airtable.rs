//! Airtable connector.
//!
//! Authenticates with a personal access token supplied directly; there is
//! no redirect handshake. Validation hits the `whoami` endpoint and record
//! fetches enumerate the bases the token can see.

use crate::http;
use async_trait::async_trait;
use patchbay_core::{OwnerId, ProviderId};
use patchbay_integration::{
    AuthChallenge, AuthInput, AuthOutcome, CallbackPayload, Connector, ConnectorDescriptor,
    ConnectorError, Credential, FieldKind, FieldSpec, Record, RecordQuery, RecordStream,
    SecretMaterial,
};
use serde::Deserialize;
use tracing::debug;

/// Provider ID the Airtable connector registers under.
pub const PROVIDER_ID: &str = "airtable";

const API_BASE: &str = "https://api.airtable.com";

/// Record kind produced by this connector.
const KIND_BASE: &str = "base";

/// Connector for Airtable personal access tokens.
pub struct AirtableConnector {
    http: reqwest::Client,
    api_base: String,
}

impl AirtableConnector {
    /// Creates a connector against the production API.
    #[must_use]
    pub fn new() -> Self {
        Self::with_api_base(API_BASE)
    }

    fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }
}

impl Default for AirtableConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for AirtableConnector {
    fn describe(&self) -> ConnectorDescriptor {
        ConnectorDescriptor {
            provider_id: ProviderId::from(PROVIDER_ID),
            display_name: "Airtable".to_string(),
            required_fields: vec![FieldSpec::required("api_key", FieldKind::Secret)],
        }
    }

    async fn begin_auth(
        &self,
        owner_id: &OwnerId,
        input: &AuthInput,
    ) -> Result<AuthOutcome, ConnectorError> {
        self.describe().validate_input(input)?;
        let key = input.get("api_key").unwrap_or_default().trim().to_string();

        Ok(AuthOutcome::Credential(Credential::new(
            ProviderId::from(PROVIDER_ID),
            owner_id.clone(),
            SecretMaterial::api_key(key),
        )))
    }

    async fn complete_auth(
        &self,
        _challenge: &AuthChallenge,
        _payload: &CallbackPayload,
    ) -> Result<Credential, ConnectorError> {
        Err(ConnectorError::auth(
            "airtable does not use a redirect handshake",
        ))
    }

    async fn validate(&self, credential: &Credential) -> Result<bool, ConnectorError> {
        let response = self
            .http
            .get(format!("{}/v0/meta/whoami", self.api_base))
            .bearer_auth(credential.material.bearer_token())
            .send()
            .await;

        match response {
            Ok(response) => Ok(response.status().is_success()),
            Err(err) => {
                // Fail closed on transport problems
                debug!(error = %err, "whoami unreachable");
                Ok(false)
            }
        }
    }

    async fn fetch(
        &self,
        credential: &Credential,
        query: RecordQuery,
    ) -> Result<RecordStream, ConnectorError> {
        if query.kind.as_deref().is_some_and(|kind| kind != KIND_BASE) {
            return Ok(Box::pin(futures::stream::iter(Vec::<
                Result<Record, ConnectorError>,
            >::new())));
        }

        let mut request = self
            .http
            .get(format!("{}/v0/meta/bases", self.api_base))
            .bearer_auth(credential.material.bearer_token());
        if let Some(cursor) = &query.cursor {
            request = request.query(&[("offset", cursor)]);
        }

        let response = request.send().await.map_err(http::transport_error)?;
        let page: BasesPage = http::check(response)?
            .json()
            .await
            .map_err(|err| ConnectorError::protocol(format!("malformed bases response: {err}")))?;

        let limit = query.page_size.map_or(usize::MAX, |n| n as usize);
        let records: Vec<Result<Record, ConnectorError>> = page
            .bases
            .into_iter()
            .take(limit)
            .map(|base| Ok(base_record(base)))
            .collect();
        Ok(Box::pin(futures::stream::iter(records)))
    }
}

#[derive(Debug, Deserialize)]
struct BasesPage {
    #[serde(default)]
    bases: Vec<AirtableBase>,
}

#[derive(Debug, Deserialize)]
struct AirtableBase {
    id: String,
    name: String,
}

fn base_record(base: AirtableBase) -> Record {
    Record {
        url: Some(format!("https://airtable.com/{}", base.id)),
        id: base.id,
        name: Some(base.name),
        kind: KIND_BASE.to_string(),
        parent_id: None,
        parent_name: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_declares_a_secret_api_key() {
        let descriptor = AirtableConnector::new().describe();
        assert_eq!(descriptor.provider_id, ProviderId::from("airtable"));
        assert_eq!(descriptor.required_fields.len(), 1);
        assert_eq!(descriptor.required_fields[0].key, "api_key");
        assert_eq!(descriptor.required_fields[0].kind, FieldKind::Secret);
        assert!(descriptor.required_fields[0].required);
    }

    #[tokio::test]
    async fn begin_auth_mints_a_credential_directly() {
        let connector = AirtableConnector::new();
        let input = AuthInput::new().with_field("api_key", "  pat_abc123  ");

        let outcome = connector
            .begin_auth(&OwnerId::from("user1"), &input)
            .await
            .expect("begin_auth");

        match outcome {
            AuthOutcome::Credential(credential) => {
                assert_eq!(credential.material.bearer_token(), "pat_abc123");
                assert_eq!(credential.owner_id, OwnerId::from("user1"));
            }
            AuthOutcome::Challenge(_) => panic!("expected a direct credential"),
        }
    }

    #[tokio::test]
    async fn begin_auth_rejects_missing_api_key() {
        let connector = AirtableConnector::new();
        let err = connector
            .begin_auth(&OwnerId::from("user1"), &AuthInput::new())
            .await
            .unwrap_err();

        match err {
            ConnectorError::Validation { fields } => {
                assert_eq!(fields, vec!["api_key".to_string()]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn complete_auth_is_refused() {
        let connector = AirtableConnector::new();
        let challenge = AuthChallenge {
            provider_id: ProviderId::from("airtable"),
            owner_id: OwnerId::from("user1"),
            authorize_url: String::new(),
            correlation_token: String::new(),
            pkce_verifier: None,
            expires_at: chrono::Utc::now(),
        };
        let result = connector
            .complete_auth(&challenge, &CallbackPayload::default())
            .await;
        assert!(matches!(result, Err(ConnectorError::Auth { .. })));
    }

    #[test]
    fn base_record_mapping() {
        let record = base_record(AirtableBase {
            id: "appXYZ".to_string(),
            name: "Product Catalog".to_string(),
        });

        assert_eq!(record.id, "appXYZ");
        assert_eq!(record.name.as_deref(), Some("Product Catalog"));
        assert_eq!(record.kind, "base");
        assert_eq!(record.url.as_deref(), Some("https://airtable.com/appXYZ"));
    }
}
