use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::core::metrics;
use crate::core::time::DateTime;
use crate::outage::adapter::{FetchError, OutageSource};
use crate::outage::domain::{RawRecord, Snapshot, normalize};
use crate::outage::{Health, OutageSignal, OutageState, Phase, PollOutcome};

/// Runs single poll cycles and owns the published state of one area.
pub struct OutageService<S> {
    area: String,
    postcode: String,
    source: S,
    snapshot: Option<Arc<Snapshot>>,
    health: Health,
    last_attempt: Option<DateTime>,
    last_success: Option<DateTime>,
    state_tx: watch::Sender<OutageState>,
    signal_tx: broadcast::Sender<OutageSignal>,
}

impl<S: OutageSource> OutageService<S> {
    pub fn new(
        area: &str,
        postcode: &str,
        source: S,
        state_tx: watch::Sender<OutageState>,
        signal_tx: broadcast::Sender<OutageSignal>,
    ) -> Self {
        let service = Self {
            area: area.to_owned(),
            postcode: postcode.to_owned(),
            source,
            snapshot: None,
            health: Health::Unknown,
            last_attempt: None,
            last_success: None,
            state_tx,
            signal_tx,
        };

        service.publish_state(Phase::Idle);
        service
    }

    pub fn postcode(&self) -> &str {
        &self.postcode
    }

    /// A permanent failure keeps scheduled polling off until the area is reconfigured.
    pub fn is_suspended(&self) -> bool {
        matches!(self.health, Health::Failed { .. })
    }

    #[tracing::instrument(skip(self), fields(area = %self.area, postcode = %self.postcode, source = self.source.name()))]
    pub async fn poll(&mut self) -> PollOutcome {
        self.publish_state(Phase::Polling);
        self.last_attempt = Some(DateTime::now());

        match self.source.fetch(&self.postcode).await {
            Ok(records) => self.publish_records(&records),
            Err(error) => self.degrade(error),
        }
    }

    /// Switches to another postcode. The old snapshot says nothing about the new area,
    /// so it is dropped instead of being diffed against.
    pub fn reconfigure(&mut self, postcode: &str) {
        tracing::info!(
            "Reconfiguring power cut area {} from {} to {}",
            self.area,
            self.postcode,
            postcode
        );

        self.postcode = postcode.to_owned();
        self.snapshot = None;
        self.health = Health::Unknown;
        self.last_attempt = None;
        self.last_success = None;
        self.publish_state(Phase::Idle);
    }

    fn publish_records(&mut self, records: &[RawRecord]) -> PollOutcome {
        let normalized = normalize(records);
        metrics::records_dropped(&self.area, normalized.dropped());
        metrics::fields_defaulted(&self.area, normalized.defaulted());

        let snapshot = Snapshot::new(self.postcode.clone(), normalized.events);
        let delta = snapshot.diff(self.snapshot.as_deref());
        let snapshot = Arc::new(snapshot);

        self.snapshot = Some(snapshot.clone());
        self.health = Health::Ok;
        self.last_success = self.last_attempt;
        self.publish_state(Phase::Idle);

        if delta.is_empty() {
            tracing::debug!("Power cuts for {} unchanged ({} active)", self.postcode, snapshot.count);
        } else {
            tracing::info!(
                "Published {} power cuts for {} ({} new, {} resolved)",
                snapshot.count,
                self.postcode,
                delta.new.len(),
                delta.resolved.len()
            );
        }
        metrics::poll_completed(&self.area, "published");
        metrics::outages_current(&self.area, snapshot.count);

        self.send(OutageSignal::Updated(snapshot.clone()));

        for event in &delta.new {
            tracing::info!("New power cut {} affecting {}", event.reference, self.postcode);
            self.send(OutageSignal::NewOutage(event.clone()));
        }

        for event in &delta.resolved {
            tracing::info!("Power cut {} affecting {} resolved", event.reference, self.postcode);
            self.send(OutageSignal::ResolvedOutage(event.clone()));
        }

        PollOutcome::Published {
            count: snapshot.count,
            new: delta.new.len(),
            resolved: delta.resolved.len(),
        }
    }

    fn degrade(&mut self, error: FetchError) -> PollOutcome {
        if error.is_transient() {
            tracing::warn!("Power cut poll for {} failed, keeping last known state: {}", self.postcode, error);
            metrics::poll_completed(&self.area, "transient");
            self.health = Health::Stale {
                error: error.to_string(),
            };
        } else {
            tracing::error!(
                "Power cut poll for {} failed permanently, suspending scheduled polls: {}",
                self.postcode,
                error
            );
            metrics::poll_completed(&self.area, "permanent");
            self.health = Health::Failed {
                error: error.to_string(),
            };
        }

        self.publish_state(Phase::Idle);
        self.send(OutageSignal::PollFailed(error.clone()));

        PollOutcome::Degraded(error)
    }

    fn publish_state(&self, phase: Phase) {
        let state = OutageState {
            area: self.area.clone(),
            postcode: self.postcode.clone(),
            phase,
            health: self.health.clone(),
            snapshot: self.snapshot.clone(),
            last_attempt: self.last_attempt,
            last_success: self.last_success,
        };

        self.state_tx.send_replace(state);
    }

    fn send(&self, signal: OutageSignal) {
        //no subscriber is not an error
        if self.signal_tx.receiver_count() == 0 {
            return;
        }

        if let Err(e) = self.signal_tx.send(signal) {
            tracing::error!("Error sending power cut signal for {}: {:?}", self.area, e);
        }
    }
}
