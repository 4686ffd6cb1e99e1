use std::collections::HashSet;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use infrastructure::{HttpServerConfig, MonitoringConfig};
use serde::Deserialize;

use crate::outage::adapter::DEFAULT_API_URL;

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
    pub homeassistant: Option<crate::adapter::homeassistant::HomeAssistant>,
    #[serde(default)]
    pub upstream: UpstreamSettings,
    #[serde(default)]
    pub areas: Vec<AreaSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSettings {
    #[serde(default = "default_api_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// One monitored postcode. `id` is used in entity ids and API paths.
#[derive(Debug, Deserialize, Clone)]
pub struct AreaSettings {
    pub id: String,
    #[serde(default = "default_area_name")]
    pub name: String,
    pub postcode: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config.toml").required(false))
            .add_source(
                Environment::with_prefix("POWERCUT")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(","),
            );

        let s = builder.build()?;
        s.try_deserialize()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.areas.is_empty(), "At least one area must be configured");

        let mut ids = HashSet::new();
        for area in &self.areas {
            anyhow::ensure!(!area.id.trim().is_empty(), "Area id must not be empty");
            anyhow::ensure!(ids.insert(area.id.as_str()), "Area {} configured more than once", area.id);
            anyhow::ensure!(
                !area.postcode.trim().is_empty(),
                "Postcode of area {} must not be empty",
                area.id
            );
        }

        Ok(())
    }
}

impl UpstreamSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_area_name() -> String {
    "Northern Powergrid Power Cut".to_string()
}
