//! HubSpot connector.
//!
//! OAuth 2.0 with PKCE. `begin_auth` issues a redirect challenge whose
//! correlation token encodes a CSRF secret together with the owner, so the
//! callback can be tied back to both. `complete_auth` verifies the echoed
//! token and exchanges the authorization code for tokens. Record fetches
//! read CRM contacts and companies.

use crate::config::HubspotConfig;
use crate::http;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EmptyExtraTokenFields,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope, StandardTokenResponse, TokenResponse,
    TokenUrl,
    basic::{BasicClient, BasicTokenType},
};
use patchbay_core::{OwnerId, ProviderId};
use patchbay_integration::{
    AuthChallenge, AuthInput, AuthOutcome, CallbackPayload, Connector, ConnectorDescriptor,
    ConnectorError, Credential, FieldKind, FieldSpec, Record, RecordQuery, RecordStream,
    SecretMaterial,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Provider ID the HubSpot connector registers under.
pub const PROVIDER_ID: &str = "hubspot";

const AUTH_URL: &str = "https://app.hubspot.com/oauth/authorize";
const TOKEN_URL: &str = "https://api.hubapi.com/oauth/v1/token";
const API_BASE: &str = "https://api.hubapi.com";

const SCOPES: &[&str] = &["crm.objects.contacts.read", "crm.objects.companies.read"];

/// How long an issued challenge is honored.
const CHALLENGE_TTL_MINUTES: i64 = 10;

type HubspotTokenResponse = StandardTokenResponse<EmptyExtraTokenFields, BasicTokenType>;

/// Connector for HubSpot CRM over OAuth.
pub struct HubspotConnector {
    client_id: String,
    client_secret: String,
    redirect_url: String,
    api_base: String,
    http: reqwest::Client,
}

/// What the correlation token carries across the redirect.
#[derive(Debug, Serialize, Deserialize)]
struct StatePayload {
    token: String,
    owner_id: String,
}

impl HubspotConnector {
    /// Creates a connector for a configured OAuth application.
    #[must_use]
    pub fn new(config: HubspotConfig) -> Self {
        Self {
            client_id: config.client_id,
            client_secret: config.client_secret,
            redirect_url: config.redirect_url,
            api_base: API_BASE.to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn redirect_uri(&self) -> Result<RedirectUrl, ConnectorError> {
        RedirectUrl::new(self.redirect_url.clone())
            .map_err(|err| ConnectorError::protocol(format!("invalid redirect URL: {err}")))
    }
}

/// Encodes the CSRF secret and owner into the `state` parameter.
fn encode_state(token: &str, owner_id: &OwnerId) -> String {
    let payload = StatePayload {
        token: token.to_string(),
        owner_id: owner_id.to_string(),
    };
    let json = serde_json::to_string(&payload).expect("serialize state payload");
    URL_SAFE_NO_PAD.encode(json)
}

/// Decodes a `state` parameter back into its payload.
fn decode_state(state: &str) -> Option<StatePayload> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[async_trait]
impl Connector for HubspotConnector {
    fn describe(&self) -> ConnectorDescriptor {
        ConnectorDescriptor {
            provider_id: ProviderId::from(PROVIDER_ID),
            display_name: "HubSpot".to_string(),
            required_fields: vec![FieldSpec::required("authorization", FieldKind::OauthRedirect)],
        }
    }

    async fn begin_auth(
        &self,
        owner_id: &OwnerId,
        input: &AuthInput,
    ) -> Result<AuthOutcome, ConnectorError> {
        self.describe().validate_input(input)?;

        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(AUTH_URL.to_string()).expect("valid auth URL"))
            .set_redirect_uri(self.redirect_uri()?);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let state = encode_state(CsrfToken::new_random().secret(), owner_id);

        let mut auth_request = client
            .authorize_url({
                let state = state.clone();
                move || CsrfToken::new(state)
            })
            .set_pkce_challenge(pkce_challenge);
        for scope in SCOPES {
            auth_request = auth_request.add_scope(Scope::new((*scope).to_string()));
        }

        let (authorize_url, csrf_token) = auth_request.url();

        Ok(AuthOutcome::Challenge(AuthChallenge {
            provider_id: ProviderId::from(PROVIDER_ID),
            owner_id: owner_id.clone(),
            authorize_url: authorize_url.to_string(),
            correlation_token: csrf_token.secret().clone(),
            pkce_verifier: Some(pkce_verifier.secret().clone()),
            expires_at: Utc::now() + chrono::Duration::minutes(CHALLENGE_TTL_MINUTES),
        }))
    }

    async fn complete_auth(
        &self,
        challenge: &AuthChallenge,
        payload: &CallbackPayload,
    ) -> Result<Credential, ConnectorError> {
        if let Some(error) = &payload.error {
            let detail = payload.error_description.as_deref().unwrap_or("no detail");
            return Err(ConnectorError::auth(format!(
                "provider rejected authorization: {error} ({detail})"
            )));
        }
        if challenge.is_expired() {
            return Err(ConnectorError::auth("authorization challenge expired"));
        }
        if payload.state != challenge.correlation_token {
            return Err(ConnectorError::auth("correlation token mismatch"));
        }
        let state = decode_state(&payload.state)
            .ok_or_else(|| ConnectorError::auth("malformed correlation token"))?;
        if state.owner_id != challenge.owner_id.as_str() {
            return Err(ConnectorError::auth("correlation token owner mismatch"));
        }
        let verifier = challenge
            .pkce_verifier
            .clone()
            .ok_or_else(|| ConnectorError::auth("challenge is missing its PKCE verifier"))?;

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| ConnectorError::protocol(format!("HTTP client error: {err}")))?;

        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(TokenUrl::new(TOKEN_URL.to_string()).expect("valid token URL"))
            .set_redirect_uri(self.redirect_uri()?);

        let token: HubspotTokenResponse = client
            .exchange_code(AuthorizationCode::new(payload.code.clone()))
            .set_pkce_verifier(PkceCodeVerifier::new(verifier))
            .request_async(&http_client)
            .await
            .map_err(|err| ConnectorError::auth(format!("token exchange failed: {err}")))?;

        let material = SecretMaterial::Oauth2 {
            access_token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            token_type: "Bearer".to_string(),
            scope: Some(SCOPES.join(" ")),
        };

        let mut credential = Credential::new(
            ProviderId::from(PROVIDER_ID),
            challenge.owner_id.clone(),
            material,
        );
        if let Some(expires_in) = token.expires_in()
            && let Ok(ttl) = chrono::Duration::from_std(expires_in)
        {
            credential = credential.with_expiry(Utc::now() + ttl);
        }
        Ok(credential)
    }

    async fn validate(&self, credential: &Credential) -> Result<bool, ConnectorError> {
        let url = format!(
            "{}/oauth/v1/access-tokens/{}",
            self.api_base,
            credential.material.bearer_token()
        );
        match self.http.get(url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(err) => {
                // Fail closed on transport problems
                debug!(error = %err, "token introspection unreachable");
                Ok(false)
            }
        }
    }

    async fn fetch(
        &self,
        credential: &Credential,
        query: RecordQuery,
    ) -> Result<RecordStream, ConnectorError> {
        let kinds: Vec<&str> = ["contact", "company"]
            .into_iter()
            .filter(|kind| query.kind.as_deref().is_none_or(|wanted| wanted == *kind))
            .collect();

        let mut records: Vec<Result<Record, ConnectorError>> = Vec::new();
        for kind in kinds {
            let (object, properties) = match kind {
                "contact" => ("contacts", "firstname,lastname,email"),
                _ => ("companies", "name,domain"),
            };

            let mut params: Vec<(&str, String)> =
                vec![("properties", properties.to_string())];
            if let Some(page_size) = query.page_size {
                params.push(("limit", page_size.to_string()));
            }
            if let Some(cursor) = &query.cursor {
                params.push(("after", cursor.clone()));
            }

            let response = self
                .http
                .get(format!("{}/crm/v3/objects/{object}", self.api_base))
                .bearer_auth(credential.material.bearer_token())
                .query(&params)
                .send()
                .await
                .map_err(http::transport_error)?;

            let page: ObjectPage = http::check(response)?.json().await.map_err(|err| {
                ConnectorError::protocol(format!("malformed {object} response: {err}"))
            })?;

            records.extend(
                page.results
                    .into_iter()
                    .map(|object| Ok(object_record(kind, object))),
            );
        }

        Ok(Box::pin(futures::stream::iter(records)))
    }
}

#[derive(Debug, Deserialize)]
struct ObjectPage {
    #[serde(default)]
    results: Vec<CrmObject>,
}

#[derive(Debug, Deserialize)]
struct CrmObject {
    id: String,
    #[serde(default)]
    properties: serde_json::Value,
}

fn object_record(kind: &str, object: CrmObject) -> Record {
    let name = match kind {
        "contact" => contact_name(&object.properties),
        _ => property(&object.properties, "name"),
    };
    Record {
        id: object.id,
        name,
        kind: kind.to_string(),
        parent_id: None,
        parent_name: None,
        url: None,
    }
}

/// Joins first and last name, falling back to the email address.
fn contact_name(properties: &serde_json::Value) -> Option<String> {
    let parts: Vec<String> = ["firstname", "lastname"]
        .iter()
        .filter_map(|key| property(properties, key))
        .collect();
    if parts.is_empty() {
        property(properties, "email")
    } else {
        Some(parts.join(" "))
    }
}

fn property(properties: &serde_json::Value, key: &str) -> Option<String> {
    let value = properties.get(key)?.as_str()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
