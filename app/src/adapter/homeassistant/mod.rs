mod client;
mod publisher;
mod sensor;

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use client::HaHttpClient;
use sensor::AreaSensors;

pub use publisher::SensorPublisher;

use crate::outage::OutageClient;
use crate::settings::AreaSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct HomeAssistant {
    pub url: String,
    pub token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl HomeAssistant {
    pub fn new_sensor_publisher(&self, area: &AreaSettings, outage: OutageClient) -> anyhow::Result<SensorPublisher> {
        let client = HaHttpClient::new(&self.url, &self.token, Duration::from_secs(self.timeout_secs))
            .context("Error creating HA HTTP client")?;

        Ok(SensorPublisher::new(client, AreaSensors::new(&area.id, &area.name), outage))
    }
}
