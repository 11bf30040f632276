//! Built-in provider connectors.
//!
//! Each connector implements the [`Connector`](patchbay_integration::Connector)
//! contract from `patchbay-integration`. [`builtin_registry`] assembles
//! them into a registry ready to hand to the orchestrator.

pub mod airtable;
pub mod config;
pub mod hubspot;
mod http;
pub mod notion;

pub use airtable::AirtableConnector;
pub use config::{ConnectorsConfig, HubspotConfig};
pub use hubspot::HubspotConnector;
pub use notion::NotionConnector;

use patchbay_core::ProviderId;
use patchbay_integration::{ConnectorRegistry, RegistryError};
use std::sync::Arc;

/// Builds a registry holding every connector the configuration enables.
///
/// Airtable and Notion take their secrets from the user at connection time
/// and are always registered. HubSpot needs an OAuth application and is
/// registered only when one is configured.
///
/// # Errors
///
/// Returns `RegistryError::Conflict` if called against IDs that are
/// already taken, which cannot happen for a fresh registry.
pub fn builtin_registry(config: &ConnectorsConfig) -> Result<ConnectorRegistry, RegistryError> {
    let mut registry = ConnectorRegistry::new();

    registry.register(
        ProviderId::from(airtable::PROVIDER_ID),
        Box::new(|| Arc::new(AirtableConnector::new())),
    )?;
    registry.register(
        ProviderId::from(notion::PROVIDER_ID),
        Box::new(|| Arc::new(NotionConnector::new())),
    )?;

    if let Some(hubspot) = &config.hubspot {
        let hubspot = hubspot.clone();
        registry.register(
            ProviderId::from(hubspot::PROVIDER_ID),
            Box::new(move || Arc::new(HubspotConnector::new(hubspot.clone()))),
        )?;
    }

    Ok(registry)
}
