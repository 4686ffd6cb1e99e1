pub mod adapter;
mod domain;
mod service;

pub use domain::*;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::time::DateTime;
use crate::outage::adapter::{FetchError, OutageSource, normalize_postcode};
use crate::outage::service::OutageService;

/// Fixed upstream polling interval.
pub const POLL_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub enum OutageSignal {
    Updated(Arc<Snapshot>),
    NewOutage(Event),
    ResolvedOutage(Event),
    PollFailed(FetchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Polling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Health {
    /// No poll completed since start or since the last reconfiguration
    Unknown,
    Ok,
    /// Last poll failed transiently, snapshot is the last known good one
    Stale { error: String },
    /// Upstream broke its contract, scheduled polling is suspended
    Failed { error: String },
}

/// What subscribers read. Replaced as a whole on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutageState {
    pub area: String,
    pub postcode: String,
    pub phase: Phase,
    pub health: Health,
    pub snapshot: Option<Arc<Snapshot>>,
    pub last_attempt: Option<DateTime>,
    pub last_success: Option<DateTime>,
}

impl OutageState {
    pub fn initial(area: &str, postcode: &str) -> Self {
        Self {
            area: area.to_owned(),
            postcode: postcode.to_owned(),
            phase: Phase::Idle,
            health: Health::Unknown,
            snapshot: None,
            last_attempt: None,
            last_success: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Published { count: usize, new: usize, resolved: usize },
    Degraded(FetchError),
}

enum OutageCommand {
    Refresh {
        reply: oneshot::Sender<PollOutcome>,
    },
    Reconfigure {
        postcode: String,
        reply: oneshot::Sender<PollOutcome>,
    },
}

#[derive(Clone)]
pub struct OutageClient {
    area: String,
    command_tx: mpsc::Sender<OutageCommand>,
    state_rx: watch::Receiver<OutageState>,
    signal_tx: broadcast::Sender<OutageSignal>,
}

/// Polling coordinator of one area. All polls, scheduled or requested, run on the
/// single loop in [`OutageRunner::run`], so there is never more than one in flight.
pub struct OutageRunner<S> {
    service: OutageService<S>,
    interval: Duration,
    client: OutageClient,
    command_rx: mpsc::Receiver<OutageCommand>,
}

impl<S: OutageSource> OutageRunner<S> {
    pub fn new(area: &str, postcode: &str, source: S) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(OutageState::initial(area, postcode));
        let (signal_tx, _signal_rx) = broadcast::channel(128);

        let service = OutageService::new(area, postcode, source, state_tx, signal_tx.clone());

        Self {
            service,
            interval: POLL_INTERVAL,
            client: OutageClient {
                area: area.to_owned(),
                command_tx,
                state_rx,
                signal_tx,
            },
            command_rx,
        }
    }

    #[cfg(test)]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn client(&self) -> OutageClient {
        self.client.clone()
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            mut service,
            interval,
            client,
            mut command_rx,
        } = self;
        //only handed out clients keep the command channel open
        drop(client);

        //first tick fires immediately
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    tracing::info!("Stopping power cut polling for {}", service.postcode());
                    break;
                }

                Some(command) = command_rx.recv() => {
                    //everything queued up to now is served by one poll
                    let mut batch = vec![command];
                    while let Ok(next) = command_rx.try_recv() {
                        batch.push(next);
                    }

                    handle_commands(&mut service, batch).await;

                    //Schedule next regular update
                    ticker.reset();
                }

                _ = ticker.tick() => {
                    if service.is_suspended() {
                        tracing::debug!("Scheduled power cut poll for {} skipped, source failed permanently", service.postcode());
                        continue;
                    }

                    service.poll().await;
                }
            }
        }
    }
}

async fn handle_commands<S: OutageSource>(service: &mut OutageService<S>, batch: Vec<OutageCommand>) {
    let mut replies = Vec::with_capacity(batch.len());

    for command in batch {
        match command {
            OutageCommand::Refresh { reply } => replies.push(reply),
            OutageCommand::Reconfigure { postcode, reply } => {
                //same area in another spelling keeps its snapshot
                let changed = normalize_postcode(&postcode) != normalize_postcode(service.postcode());
                if changed || service.is_suspended() {
                    service.reconfigure(&postcode);
                }
                replies.push(reply);
            }
        }
    }

    if replies.len() > 1 {
        tracing::debug!("Coalesced {} power cut refresh requests into one poll", replies.len());
    }

    let outcome = service.poll().await;

    for reply in replies {
        //requester may have given up waiting
        let _ = reply.send(outcome.clone());
    }
}

impl OutageClient {
    pub fn area(&self) -> &str {
        &self.area
    }

    pub fn state(&self) -> OutageState {
        self.state_rx.borrow().clone()
    }

    #[cfg(test)]
    pub fn watch(&self) -> watch::Receiver<OutageState> {
        self.state_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutageSignal> {
        self.signal_tx.subscribe()
    }

    pub async fn refresh(&self) -> anyhow::Result<PollOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(OutageCommand::Refresh { reply }, rx).await
    }

    pub async fn reconfigure(&self, postcode: &str) -> anyhow::Result<PollOutcome> {
        let postcode = postcode.trim();
        anyhow::ensure!(!postcode.is_empty(), "Postcode must not be empty");

        let (reply, rx) = oneshot::channel();
        let command = OutageCommand::Reconfigure {
            postcode: postcode.to_owned(),
            reply,
        };
        self.send(command, rx).await
    }

    async fn send(&self, command: OutageCommand, rx: oneshot::Receiver<PollOutcome>) -> anyhow::Result<PollOutcome> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("Power cut coordinator for {} is not running", self.area))?;

        rx.await
            .map_err(|_| anyhow::anyhow!("Power cut coordinator for {} stopped before answering", self.area))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outage::adapter::testing::ScriptedSource;

    async fn wait_for<F: Fn(&OutageState) -> bool>(client: &OutageClient, predicate: F) -> OutageState {
        let mut rx = client.watch();
        let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s)))
            .await
            .expect("timed out waiting for state")
            .expect("coordinator gone");
        state.clone()
    }

    fn spawn(runner: OutageRunner<ScriptedSource>) -> (OutageClient, CancellationToken) {
        let client = runner.client();
        let shutdown = CancellationToken::new();
        tokio::spawn(runner.run(shutdown.clone()));
        (client, shutdown)
    }

    #[tokio::test]
    async fn polls_immediately_on_start() {
        let source = ScriptedSource::new();
        source.respond_records(&["R1", "R2"]);
        let (client, shutdown) = spawn(OutageRunner::new("home", "NE11AA", source.clone()));

        let state = wait_for(&client, |s| s.health == Health::Ok).await;

        assert_eq!(state.snapshot.map(|s| s.count), Some(2));
        assert_eq!(source.fetch_count(), 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn manual_refresh_returns_outcome() {
        let source = ScriptedSource::new();
        source.respond_records(&["R1"]).respond_records(&["R1", "R2"]);
        let (client, shutdown) = spawn(OutageRunner::new("home", "NE11AA", source.clone()));
        wait_for(&client, |s| s.health == Health::Ok).await;

        let outcome = client.refresh().await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Published {
                count: 2,
                new: 1,
                resolved: 0
            }
        );
        assert_eq!(client.state().snapshot.map(|s| s.count), Some(2));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn concurrent_refreshes_never_overlap() {
        let source = ScriptedSource::new().with_delay(Duration::from_millis(50));
        source.respond_records(&["R1"]);
        let (client, shutdown) = spawn(OutageRunner::new("home", "NE11AA", source.clone()));
        wait_for(&client, |s| s.health == Health::Ok && s.phase == Phase::Idle).await;

        let (a, b, c) = tokio::join!(client.refresh(), client.refresh(), client.refresh());

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(source.max_in_flight(), 1);
        //initial poll plus at most one per request, coalescing may merge them
        assert!(source.fetch_count() <= 4);
        assert!(source.fetch_count() >= 2);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn scheduled_ticks_keep_polling() {
        let source = ScriptedSource::new();
        source.respond_records(&["R1"]);
        let runner = OutageRunner::new("home", "NE11AA", source.clone()).with_interval(Duration::from_millis(20));
        let (_client, shutdown) = spawn(runner);

        tokio::time::timeout(Duration::from_secs(5), async {
            while source.fetch_count() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scheduled polls did not happen");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn permanent_failure_stops_scheduled_polls() {
        let source = ScriptedSource::new();
        source.respond(Err(FetchError::permanent("schema changed")));
        let runner = OutageRunner::new("home", "NE11AA", source.clone()).with_interval(Duration::from_millis(10));
        let (client, shutdown) = spawn(runner);

        wait_for(&client, |s| matches!(s.health, Health::Failed { .. })).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(source.fetch_count(), 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn reconfigure_polls_new_postcode_and_resets_state() {
        let source = ScriptedSource::new();
        source.respond_records(&["A"]).respond_records(&["B"]);
        let (client, shutdown) = spawn(OutageRunner::new("home", "NE11AA", source.clone()));
        wait_for(&client, |s| s.health == Health::Ok).await;
        let mut signals = client.subscribe();

        let outcome = client.reconfigure(" DH1 3LE ").await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Published {
                count: 1,
                new: 1,
                resolved: 0
            }
        );
        assert_eq!(client.state().postcode, "DH1 3LE");
        assert_eq!(source.requested_postcodes().last().map(String::as_str), Some("DH1 3LE"));

        let mut saw_resolved = false;
        while let Ok(signal) = signals.try_recv() {
            if let OutageSignal::ResolvedOutage(_) = signal {
                saw_resolved = true;
            }
        }
        assert!(!saw_resolved);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn blank_postcode_is_rejected() {
        let (client, shutdown) = spawn(OutageRunner::new("home", "NE11AA", ScriptedSource::new()));

        assert!(client.reconfigure("   ").await.is_err());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn refresh_after_shutdown_fails() {
        let (client, shutdown) = spawn(OutageRunner::new("home", "NE11AA", ScriptedSource::new()));
        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(client.refresh().await.is_err());
    }

    #[tokio::test]
    async fn reconfigure_to_same_postcode_spelled_differently_keeps_snapshot() {
        let source = ScriptedSource::new();
        source.respond_records(&["A", "B"]);
        let (client, shutdown) = spawn(OutageRunner::new("home", "NE1 1AA", source.clone()));
        wait_for(&client, |s| s.health == Health::Ok).await;

        let outcome = client.reconfigure("ne11aa").await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Published {
                count: 2,
                new: 0,
                resolved: 0
            }
        );
        assert_eq!(client.state().postcode, "NE1 1AA");
        assert_eq!(source.requested_postcodes(), vec!["NE1 1AA", "NE1 1AA"]);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn transient_failure_waits_for_regular_schedule() {
        let source = ScriptedSource::new();
        source.respond(Err(FetchError::transient("connection reset")));
        let runner = OutageRunner::new("home", "NE11AA", source.clone()).with_interval(Duration::from_millis(300));
        let (client, shutdown) = spawn(runner);

        wait_for(&client, |s| matches!(s.health, Health::Stale { .. })).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(source.fetch_count(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(source.fetch_count(), 2);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn ticks_during_slow_poll_are_skipped() {
        let source = ScriptedSource::new().with_delay(Duration::from_millis(100));
        source.respond_records(&["R1"]);
        let runner = OutageRunner::new("home", "NE11AA", source.clone()).with_interval(Duration::from_millis(20));
        let (_client, shutdown) = spawn(runner);

        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown.cancel();
        //a poll in flight still finishes before the loop sees the cancellation
        tokio::time::sleep(Duration::from_millis(150)).await;
        let polls = source.fetch_count();

        assert_eq!(source.max_in_flight(), 1);
        //at most one poll per delay, not one per elapsed tick
        assert!((2..=7).contains(&polls), "{polls} polls");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(source.fetch_count(), polls);
    }
}
