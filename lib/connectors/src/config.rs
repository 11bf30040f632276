//! Connector configuration.
//!
//! Loaded from `PATCHBAY__`-prefixed environment variables with `__` as
//! the nesting separator, e.g. `PATCHBAY__HUBSPOT__CLIENT_ID`.

use serde::Deserialize;

/// Configuration for the built-in connectors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectorsConfig {
    /// HubSpot OAuth application settings. When absent, the HubSpot
    /// connector is not registered.
    #[serde(default)]
    pub hubspot: Option<HubspotConfig>,
}

/// OAuth application settings for HubSpot.
#[derive(Debug, Clone, Deserialize)]
pub struct HubspotConfig {
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Redirect URL registered with the OAuth application.
    pub redirect_url: String,
}

impl ConnectorsConfig {
    /// Loads configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment values fail to deserialize.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("PATCHBAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_no_hubspot_section() {
        let config = ConnectorsConfig::default();
        assert!(config.hubspot.is_none());
    }

    #[test]
    fn deserializes_nested_hubspot_section() {
        let config: ConnectorsConfig = config::Config::builder()
            .set_override("hubspot.client_id", "client_abc")
            .expect("override")
            .set_override("hubspot.client_secret", "secret_xyz")
            .expect("override")
            .set_override("hubspot.redirect_url", "https://example.com/callback")
            .expect("override")
            .build()
            .expect("build")
            .try_deserialize()
            .expect("deserialize");

        let hubspot = config.hubspot.expect("hubspot section");
        assert_eq!(hubspot.client_id, "client_abc");
        assert_eq!(hubspot.redirect_url, "https://example.com/callback");
    }
}
