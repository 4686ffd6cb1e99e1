use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::core::metrics;
use crate::outage::{Event, OutageClient, OutageSignal};

use super::client::HaHttpClient;
use super::sensor::{AreaSensors, EntityState, event_payload};

pub const NEW_OUTAGE_EVENT: &str = "northern_powergrid_power_cut_new";
pub const RESOLVED_OUTAGE_EVENT: &str = "northern_powergrid_power_cut_resolved";

/// Mirrors the published power cut state of one area into Home Assistant sensors.
pub struct SensorPublisher {
    client: HaHttpClient,
    sensors: AreaSensors,
    outage: OutageClient,
    signal_rx: broadcast::Receiver<OutageSignal>,
    published_slots: usize,
}

impl SensorPublisher {
    pub fn new(client: HaHttpClient, sensors: AreaSensors, outage: OutageClient) -> Self {
        //subscribe right away, signals sent before run() must not get lost
        let signal_rx = outage.subscribe();

        Self {
            client,
            sensors,
            outage,
            signal_rx,
            published_slots: 0,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        self.push_states().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Stopping Home Assistant publisher for {}", self.sensors.id());
                    break;
                }

                signal = self.signal_rx.recv() => match signal {
                    Ok(signal) => self.handle(signal).await,
                    Err(RecvError::Lagged(skipped)) => {
                        //missed events are gone, but states can be caught up
                        tracing::warn!("Home Assistant publisher for {} lagged, skipped {} signals", self.sensors.id(), skipped);
                        self.push_states().await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    async fn handle(&mut self, signal: OutageSignal) {
        match signal {
            OutageSignal::Updated(snapshot) => {
                tracing::debug!("Pushing {} power cuts of {} to Home Assistant", snapshot.count, self.sensors.id());
                self.push_states().await;
            }
            OutageSignal::PollFailed(error) => {
                tracing::debug!("Pushing degraded state of {} to Home Assistant: {}", self.sensors.id(), error);
                self.push_states().await;
            }
            OutageSignal::NewOutage(event) => self.fire(NEW_OUTAGE_EVENT, &event).await,
            OutageSignal::ResolvedOutage(event) => self.fire(RESOLVED_OUTAGE_EVENT, &event).await,
        }
    }

    async fn push_states(&mut self) {
        let state = self.outage.state();
        let states = self.sensors.states(&state);
        let slots = state.snapshot.as_ref().map(|s| s.events.len()).unwrap_or(0);

        for (entity_id, entity_state) in states.iter() {
            self.post(entity_id, entity_state).await;
        }

        for slot in (slots + 1)..=self.published_slots {
            self.post(&self.sensors.slot_entity(slot), &EntityState::unavailable()).await;
        }

        self.published_slots = slots;
    }

    async fn post(&self, entity_id: &str, state: &EntityState) {
        if let Err(e) = self.client.post_state(entity_id, state).await {
            tracing::error!("Error pushing state of {} to Home Assistant: {:?}", entity_id, e);
            metrics::ha_push_failed(self.sensors.id(), "state");
        }
    }

    async fn fire(&self, event_type: &str, event: &Event) {
        let postcode = self.outage.state().postcode;
        let payload = event_payload(self.sensors.id(), &postcode, event);

        if let Err(e) = self.client.fire_event(event_type, &payload).await {
            tracing::error!("Error firing {} for {} in Home Assistant: {:?}", event_type, event.reference, e);
            metrics::ha_push_failed(self.sensors.id(), "event");
        }
    }
}
