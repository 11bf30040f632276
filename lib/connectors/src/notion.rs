//! Notion connector.
//!
//! Authenticates with an internal integration token supplied directly.
//! Validation resolves the bot user behind the token, and record fetches
//! search the workspace for pages and databases shared with it.

use crate::http;
use async_trait::async_trait;
use patchbay_core::{OwnerId, ProviderId};
use patchbay_integration::{
    AuthChallenge, AuthInput, AuthOutcome, CallbackPayload, Connector, ConnectorDescriptor,
    ConnectorError, Credential, FieldKind, FieldSpec, Record, RecordQuery, RecordStream,
    SecretMaterial,
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Provider ID the Notion connector registers under.
pub const PROVIDER_ID: &str = "notion";

const API_BASE: &str = "https://api.notion.com";

/// Pinned API version; Notion rejects requests without one.
const NOTION_VERSION: &str = "2022-06-28";

/// Connector for Notion internal integration tokens.
pub struct NotionConnector {
    http: reqwest::Client,
    api_base: String,
}

impl NotionConnector {
    /// Creates a connector against the production API.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: API_BASE.to_string(),
        }
    }
}

impl Default for NotionConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for NotionConnector {
    fn describe(&self) -> ConnectorDescriptor {
        ConnectorDescriptor {
            provider_id: ProviderId::from(PROVIDER_ID),
            display_name: "Notion".to_string(),
            required_fields: vec![FieldSpec::required("integration_token", FieldKind::Secret)],
        }
    }

    async fn begin_auth(
        &self,
        owner_id: &OwnerId,
        input: &AuthInput,
    ) -> Result<AuthOutcome, ConnectorError> {
        self.describe().validate_input(input)?;
        let token = input
            .get("integration_token")
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(AuthOutcome::Credential(Credential::new(
            ProviderId::from(PROVIDER_ID),
            owner_id.clone(),
            SecretMaterial::api_key(token),
        )))
    }

    async fn complete_auth(
        &self,
        _challenge: &AuthChallenge,
        _payload: &CallbackPayload,
    ) -> Result<Credential, ConnectorError> {
        Err(ConnectorError::auth(
            "notion does not use a redirect handshake",
        ))
    }

    async fn validate(&self, credential: &Credential) -> Result<bool, ConnectorError> {
        let response = self
            .http
            .get(format!("{}/v1/users/me", self.api_base))
            .bearer_auth(credential.material.bearer_token())
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await;

        match response {
            Ok(response) => Ok(response.status().is_success()),
            Err(err) => {
                // Fail closed on transport problems
                debug!(error = %err, "users/me unreachable");
                Ok(false)
            }
        }
    }

    async fn fetch(
        &self,
        credential: &Credential,
        query: RecordQuery,
    ) -> Result<RecordStream, ConnectorError> {
        let mut body = json!({});
        if let Some(kind) = &query.kind {
            // Search filters on object type; anything else yields nothing
            if kind != "page" && kind != "database" {
                return Ok(Box::pin(futures::stream::iter(Vec::<
                    Result<Record, ConnectorError>,
                >::new())));
            }
            body["filter"] = json!({ "property": "object", "value": kind });
        }
        if let Some(cursor) = &query.cursor {
            body["start_cursor"] = json!(cursor);
        }
        if let Some(page_size) = query.page_size {
            body["page_size"] = json!(page_size);
        }

        let response = self
            .http
            .post(format!("{}/v1/search", self.api_base))
            .bearer_auth(credential.material.bearer_token())
            .header("Notion-Version", NOTION_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(http::transport_error)?;

        let page: SearchPage = http::check(response)?
            .json()
            .await
            .map_err(|err| ConnectorError::protocol(format!("malformed search response: {err}")))?;

        let records: Vec<Result<Record, ConnectorError>> = page
            .results
            .into_iter()
            .map(|item| Ok(item_record(item)))
            .collect();
        Ok(Box::pin(futures::stream::iter(records)))
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: String,
    object: String,
    url: Option<String>,
    #[serde(default)]
    title: serde_json::Value,
    #[serde(default)]
    properties: serde_json::Value,
    #[serde(default)]
    parent: serde_json::Value,
}

fn item_record(item: SearchItem) -> Record {
    let name = item_title(&item);
    let parent_id = parent_id(&item.parent);
    Record {
        id: item.id,
        name,
        kind: item.object,
        parent_id,
        parent_name: None,
        url: item.url,
    }
}

/// Extracts the display title from a search result.
///
/// Databases carry a top-level `title` rich-text array; pages bury theirs
/// under the property whose type is `title`.
fn item_title(item: &SearchItem) -> Option<String> {
    if let Some(text) = rich_text_plain(&item.title) {
        return Some(text);
    }
    item.properties
        .as_object()?
        .values()
        .find(|prop| prop.get("type").and_then(|t| t.as_str()) == Some("title"))
        .and_then(|prop| rich_text_plain(prop.get("title")?))
}

fn rich_text_plain(value: &serde_json::Value) -> Option<String> {
    let text: String = value
        .as_array()?
        .iter()
        .filter_map(|span| span.get("plain_text")?.as_str())
        .collect();
    if text.is_empty() { None } else { Some(text) }
}

fn parent_id(parent: &serde_json::Value) -> Option<String> {
    let kind = parent.get("type")?.as_str()?;
    Some(parent.get(kind)?.as_str()?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_declares_a_secret_token() {
        let descriptor = NotionConnector::new().describe();
        assert_eq!(descriptor.provider_id, ProviderId::from("notion"));
        assert_eq!(descriptor.required_fields[0].key, "integration_token");
        assert_eq!(descriptor.required_fields[0].kind, FieldKind::Secret);
    }

    #[tokio::test]
    async fn begin_auth_mints_a_credential_directly() {
        let connector = NotionConnector::new();
        let input = AuthInput::new().with_field("integration_token", "secret_ntn");

        let outcome = connector
            .begin_auth(&OwnerId::from("user1"), &input)
            .await
            .expect("begin_auth");
        match outcome {
            AuthOutcome::Credential(credential) => {
                assert_eq!(credential.material.bearer_token(), "secret_ntn");
            }
            AuthOutcome::Challenge(_) => panic!("expected a direct credential"),
        }
    }

    #[tokio::test]
    async fn begin_auth_rejects_missing_token() {
        let connector = NotionConnector::new();
        let err = connector
            .begin_auth(&OwnerId::from("user1"), &AuthInput::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Validation { .. }));
    }

    fn search_item(value: serde_json::Value) -> SearchItem {
        serde_json::from_value(value).expect("search item")
    }

    #[test]
    fn database_title_comes_from_the_top_level() {
        let record = item_record(search_item(serde_json::json!({
            "id": "db1",
            "object": "database",
            "url": "https://notion.so/db1",
            "title": [{"plain_text": "Tasks"}],
            "parent": {"type": "workspace", "workspace": true}
        })));

        assert_eq!(record.kind, "database");
        assert_eq!(record.name.as_deref(), Some("Tasks"));
        assert_eq!(record.url.as_deref(), Some("https://notion.so/db1"));
        assert!(record.parent_id.is_none());
    }

    #[test]
    fn page_title_comes_from_the_title_property() {
        let record = item_record(search_item(serde_json::json!({
            "id": "pg1",
            "object": "page",
            "parent": {"type": "database_id", "database_id": "db1"},
            "properties": {
                "Name": {
                    "type": "title",
                    "title": [{"plain_text": "Quarterly "}, {"plain_text": "plan"}]
                }
            }
        })));

        assert_eq!(record.kind, "page");
        assert_eq!(record.name.as_deref(), Some("Quarterly plan"));
        assert_eq!(record.parent_id.as_deref(), Some("db1"));
    }

    #[test]
    fn untitled_items_have_no_name() {
        let record = item_record(search_item(serde_json::json!({
            "id": "pg2",
            "object": "page",
            "parent": {"type": "page_id", "page_id": "pg1"}
        })));
        assert!(record.name.is_none());
    }
}
