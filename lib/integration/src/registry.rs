//! Connector registry.
//!
//! Process-wide catalog mapping provider identifiers to connector
//! instances. Registration is a one-time setup step during startup;
//! the registry is immutable afterwards (mutation needs `&mut self`,
//! and the orchestrator takes ownership at construction).

use crate::connector::{Connector, ConnectorDescriptor};
use crate::error::RegistryError;
use patchbay_core::ProviderId;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory producing the single shared connector instance for a provider.
pub type ConnectorFactory = Box<dyn Fn() -> Arc<dyn Connector> + Send + Sync>;

/// Registry of connectors keyed by provider ID.
///
/// Lookup is O(1); iteration follows registration order.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<ProviderId, Arc<dyn Connector>>,
    order: Vec<ProviderId>,
}

impl ConnectorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connector factory under a provider ID.
    ///
    /// The factory is invoked once; every session for this provider shares
    /// the resulting instance.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Conflict` if the provider ID is already
    /// registered.
    pub fn register(
        &mut self,
        provider_id: ProviderId,
        factory: ConnectorFactory,
    ) -> Result<(), RegistryError> {
        if self.connectors.contains_key(&provider_id) {
            return Err(RegistryError::Conflict { provider_id });
        }

        self.connectors.insert(provider_id.clone(), factory());
        self.order.push(provider_id);
        Ok(())
    }

    /// Resolves a provider ID to its connector.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if no connector is registered
    /// under the given ID.
    pub fn resolve(&self, provider_id: &ProviderId) -> Result<Arc<dyn Connector>, RegistryError> {
        self.connectors
            .get(provider_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                provider_id: provider_id.clone(),
            })
    }

    /// Returns the descriptors of all registered connectors, in
    /// registration order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<ConnectorDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.connectors.get(id))
            .map(|connector| connector.describe())
            .collect()
    }

    /// Returns the number of registered connectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if no connectors are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{
        AuthChallenge, AuthInput, AuthOutcome, CallbackPayload, FieldKind, FieldSpec, Record,
        RecordQuery, RecordStream,
    };
    use crate::credential::Credential;
    use crate::error::ConnectorError;
    use async_trait::async_trait;
    use patchbay_core::OwnerId;

    struct FakeConnector {
        provider_id: ProviderId,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        fn describe(&self) -> ConnectorDescriptor {
            ConnectorDescriptor {
                provider_id: self.provider_id.clone(),
                display_name: self.provider_id.to_string(),
                required_fields: vec![FieldSpec::required("api_key", FieldKind::Secret)],
            }
        }

        async fn begin_auth(
            &self,
            _owner_id: &OwnerId,
            _input: &AuthInput,
        ) -> Result<AuthOutcome, ConnectorError> {
            Err(ConnectorError::auth("not implemented"))
        }

        async fn complete_auth(
            &self,
            _challenge: &AuthChallenge,
            _payload: &CallbackPayload,
        ) -> Result<Credential, ConnectorError> {
            Err(ConnectorError::auth("not implemented"))
        }

        async fn validate(&self, _credential: &Credential) -> Result<bool, ConnectorError> {
            Ok(false)
        }

        async fn fetch(
            &self,
            _credential: &Credential,
            _query: RecordQuery,
        ) -> Result<RecordStream, ConnectorError> {
            Ok(Box::pin(futures::stream::iter(Vec::<
                Result<Record, ConnectorError>,
            >::new())))
        }
    }

    fn factory(provider: &str) -> ConnectorFactory {
        let provider_id = ProviderId::from(provider);
        Box::new(move || {
            Arc::new(FakeConnector {
                provider_id: provider_id.clone(),
            })
        })
    }

    #[test]
    fn resolve_before_register_fails_with_not_found() {
        let registry = ConnectorRegistry::new();
        let result = registry.resolve(&ProviderId::from("notion"));
        assert!(matches!(result, Err(RegistryError::NotFound { .. })));
    }

    #[test]
    fn duplicate_registration_fails_with_conflict() {
        let mut registry = ConnectorRegistry::new();
        registry
            .register(ProviderId::from("hubspot"), factory("hubspot"))
            .expect("first registration");

        let result = registry.register(ProviderId::from("hubspot"), factory("hubspot"));
        assert!(matches!(result, Err(RegistryError::Conflict { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_returns_shared_instance() {
        let mut registry = ConnectorRegistry::new();
        registry
            .register(ProviderId::from("airtable"), factory("airtable"))
            .expect("register");

        let first = registry.resolve(&ProviderId::from("airtable")).expect("resolve");
        let second = registry.resolve(&ProviderId::from("airtable")).expect("resolve");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn descriptors_follow_registration_order() {
        let mut registry = ConnectorRegistry::new();
        for provider in ["notion", "airtable", "hubspot"] {
            registry
                .register(ProviderId::from(provider), factory(provider))
                .expect("register");
        }

        let ids: Vec<String> = registry
            .descriptors()
            .into_iter()
            .map(|d| d.provider_id.to_string())
            .collect();
        assert_eq!(ids, vec!["notion", "airtable", "hubspot"]);
    }

    #[test]
    fn describe_is_pure() {
        let mut registry = ConnectorRegistry::new();
        registry
            .register(ProviderId::from("airtable"), factory("airtable"))
            .expect("register");

        let connector = registry.resolve(&ProviderId::from("airtable")).expect("resolve");
        assert_eq!(connector.describe(), connector.describe());
    }
}
