use std::time::Duration;

use anyhow::Context;
use infrastructure::HttpClientConfig;
use reqwest_middleware::ClientWithMiddleware;

use super::sensor::EntityState;

#[derive(Debug, Clone)]
pub struct HaHttpClient {
    client: ClientWithMiddleware,
    base_url: String,
}

impl HaHttpClient {
    pub fn new(url: &str, token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = HttpClientConfig::new(Some(token.to_owned()))
            .with_timeout(timeout)
            .new_tracing_client()?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_owned(),
        })
    }
}

impl HaHttpClient {
    #[tracing::instrument(skip(self, state), fields(state = %state.state))]
    pub async fn post_state(&self, entity_id: &str, state: &EntityState) -> anyhow::Result<()> {
        let url = format!("{}/api/states/{}", self.base_url, entity_id);

        let response = self.client.post(url).json(state).send().await?;
        response
            .error_for_status()
            .with_context(|| format!("Error updating state of {}", entity_id))?;

        Ok(())
    }

    #[tracing::instrument(skip(self, payload))]
    pub async fn fire_event(&self, event_type: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
        let url = format!("{}/api/events/{}", self.base_url, event_type);

        tracing::info!("Firing HA event {}: {}", event_type, payload);

        let response = self.client.post(url).json(payload).send().await?;
        response
            .error_for_status()
            .with_context(|| format!("Error firing event {}", event_type))?;

        Ok(())
    }
}
