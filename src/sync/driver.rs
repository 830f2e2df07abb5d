//! Per-attachment driver: the single owner of every live resource.
//!
//! DESIGN
//! ======
//! One tokio task per attachment owns the channel manager, one
//! reconnection supervisor per live resource, the polling controller, the
//! timer registry, and the set of in-flight fetches. Nothing else mutates
//! them. Timers and channel pumps only post events back here:
//!
//! ```text
//!   ticker / delay tasks --DriverEvent--+
//!   channel pumps ------ChannelEvent----+--> Driver::run --> JoinSet<fetch>
//!   SyncClient ---------DriverCommand---+                       |
//!                                                               v
//!                                              ProjectionStore::apply(generation)
//! ```
//!
//! Fetch results are applied in completion order. Each write carries the
//! generation captured at attach time, so results that land after a
//! detach are discarded by the projection.
//!
//! TEARDOWN
//! ========
//! On shutdown the driver aborts every timer and in-flight fetch, closes
//! every channel, and waits (bounded) for the pumps to unsubscribe before
//! acknowledging. The caller advances the generation first.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::{ChannelEvent, ChannelManager, ChannelSignal, ChannelStatus};
use super::fetcher::Fetcher;
use super::heartbeat::spawn_heartbeat;
use super::polling::PollingController;
use super::projection::{ProjectionStore, Snapshot};
use super::reconnect::{Decision, ReconnectSupervisor, should_health_rearm};
use super::registry::{TimerKey, TimerRegistry, spawn_delay, spawn_ticker};
use crate::config::SyncConfig;
use crate::error::{ErrorCode, SyncError};
use crate::model::ResourceKind;
use crate::store::RemoteStore;

/// Upper bound on waiting for channel pumps to unsubscribe at teardown.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Timer firings posted back to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DriverEvent {
    PollTick(ResourceKind),
    RetryDue(ResourceKind),
    HealthTick,
}

pub(crate) enum DriverCommand {
    /// Re-fetch one resource now, outside any channel or poll trigger.
    Refresh(ResourceKind),
    Inspect(oneshot::Sender<AttachmentStats>),
    Shutdown(oneshot::Sender<()>),
}

/// Point-in-time view of an attachment's live resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentStats {
    pub generation: u64,
    pub timers: Vec<TimerKey>,
    pub channels: BTreeMap<ResourceKind, ChannelStatus>,
    /// Automatic reconnect attempts since the last successful subscribe.
    pub attempts: BTreeMap<ResourceKind, u32>,
    pub polling: Vec<ResourceKind>,
    pub fetches_in_flight: usize,
}

type FetchResult = (ResourceKind, Result<Snapshot, SyncError>);

pub(crate) struct Driver {
    store: Arc<dyn RemoteStore>,
    projection: Arc<ProjectionStore>,
    fetcher: Fetcher,
    config: SyncConfig,
    generation: u64,
    degraded: Arc<AtomicBool>,

    channels: ChannelManager,
    supervisors: BTreeMap<ResourceKind, ReconnectSupervisor>,
    polling: PollingController,
    timers: TimerRegistry,
    fetches: JoinSet<FetchResult>,
    /// Participant ids the coordinator's progress channel is filtered on.
    progress_scope: Vec<Uuid>,

    events_tx: mpsc::UnboundedSender<DriverEvent>,
    events_rx: mpsc::UnboundedReceiver<DriverEvent>,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl Driver {
    /// Load the initial snapshot, open every live channel, and arm the
    /// attachment's periodic timers. A failed initial read is logged; the
    /// first subscribe acknowledgement or poll tick fills the slice.
    pub(crate) async fn start(
        store: Arc<dyn RemoteStore>,
        projection: Arc<ProjectionStore>,
        fetcher: Fetcher,
        config: SyncConfig,
        generation: u64,
        degraded: Arc<AtomicBool>,
    ) -> Self {
        let session_id = fetcher.scope().session.id;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let channels = ChannelManager::new(Arc::clone(&store), session_id, config.subscribe_timeout, channel_tx);
        let supervisors = ResourceKind::LIVE.into_iter().map(|k| (k, ReconnectSupervisor::new(config.backoff))).collect();

        let mut driver = Self {
            store,
            projection,
            fetcher,
            config,
            generation,
            degraded,
            channels,
            supervisors,
            polling: PollingController::new(),
            timers: TimerRegistry::new(),
            fetches: JoinSet::new(),
            progress_scope: Vec::new(),
            events_tx,
            events_rx,
            channel_rx,
        };

        for kind in ResourceKind::ALL {
            let result = driver.fetcher.fetch(kind).await;
            driver.apply(kind, result);
        }
        for kind in ResourceKind::LIVE {
            driver.open_channel(kind);
        }

        driver.timers.replace(
            TimerKey::HealthCheck,
            spawn_ticker(driver.config.health_check_interval, driver.events_tx.clone(), DriverEvent::HealthTick),
        );
        if let Some(participant_id) = driver.fetcher.scope().participant_id() {
            driver.timers.replace(
                TimerKey::Heartbeat,
                spawn_heartbeat(
                    Arc::clone(&driver.store),
                    Arc::clone(&driver.projection),
                    generation,
                    participant_id,
                    driver.config.heartbeat_interval,
                ),
            );
        }
        info!(%session_id, generation, "attach: driver started");
        driver
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<DriverCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(DriverCommand::Refresh(kind)) => self.spawn_fetch(kind),
                    Some(DriverCommand::Inspect(reply)) => {
                        let _ = reply.send(self.stats());
                    }
                    Some(DriverCommand::Shutdown(reply)) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        return;
                    }
                    None => {
                        self.teardown().await;
                        return;
                    }
                },
                Some(event) = self.events_rx.recv() => self.on_timer(event),
                Some(event) = self.channel_rx.recv() => self.on_channel(event),
                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => match joined {
                    Ok((kind, result)) => self.apply(kind, result),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => warn!(error = %e, "fetch: task failed"),
                },
            }
        }
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    fn on_channel(&mut self, event: ChannelEvent) {
        if !self.channels.accept(&event) {
            debug!(kind = %event.kind, channel = %event.channel, "channel: stale signal ignored");
            return;
        }
        let kind = event.kind;
        match event.signal {
            ChannelSignal::Changed => self.refresh(kind),
            ChannelSignal::Status(ChannelStatus::Subscribed) => {
                if let Some(supervisor) = self.supervisors.get_mut(&kind) {
                    supervisor.on_subscribed();
                }
                self.timers.cancel(TimerKey::Backoff(kind));
                if self.config.stop_polling_on_recovery {
                    self.polling.deactivate(&mut self.timers, kind);
                }
                self.refresh(kind);
            }
            ChannelSignal::Status(ChannelStatus::Degraded) => self.on_degraded(kind),
            ChannelSignal::Status(ChannelStatus::Connecting | ChannelStatus::Closed) => {}
        }
        self.publish_degraded();
    }

    fn on_degraded(&mut self, kind: ResourceKind) {
        if let Some(interval) = self.config.poll.for_kind(kind) {
            self.polling.activate(&mut self.timers, kind, interval, &self.events_tx, DriverEvent::PollTick);
        }
        let Some(supervisor) = self.supervisors.get_mut(&kind) else {
            return;
        };
        match supervisor.on_degraded() {
            Decision::Schedule { attempt, delay } => {
                info!(%kind, attempt, delay_ms = delay.as_millis(), "reconnect: scheduled");
                self.timers.replace(
                    TimerKey::Backoff(kind),
                    spawn_delay(delay, self.events_tx.clone(), DriverEvent::RetryDue(kind)),
                );
            }
            Decision::AlreadyPending => debug!(%kind, "reconnect: already pending"),
            Decision::Exhausted => warn!(%kind, "reconnect: attempts exhausted, waiting for health check"),
        }
    }

    fn on_timer(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::PollTick(kind) => {
                if self.polling.is_active(kind) {
                    debug!(%kind, "poll: tick");
                    self.spawn_fetch(kind);
                }
            }
            DriverEvent::RetryDue(kind) => {
                self.timers.cancel(TimerKey::Backoff(kind));
                let attempt = self.supervisors.get_mut(&kind).and_then(ReconnectSupervisor::on_retry_due);
                if let Some(attempt) = attempt {
                    info!(%kind, attempt, "reconnect: retrying");
                    self.open_channel(kind);
                }
            }
            DriverEvent::HealthTick => self.on_health_tick(),
        }
    }

    fn on_health_tick(&mut self) {
        let degraded = self.channels.is_degraded();
        if !should_health_rearm(degraded, self.supervisors.values()) {
            debug!(degraded, "health: no action");
            return;
        }
        info!(kinds = ?self.channels.degraded_kinds(), "health: reopening every channel");
        for (kind, supervisor) in &mut self.supervisors {
            supervisor.on_health_rearm();
            self.timers.cancel(TimerKey::Backoff(*kind));
        }
        for kind in ResourceKind::LIVE {
            self.open_channel(kind);
        }
        self.publish_degraded();
    }

    // =========================================================================
    // FETCH
    // =========================================================================

    fn refresh(&mut self, kind: ResourceKind) {
        for target in self.fetcher.scope().refresh_plan(kind) {
            self.spawn_fetch(target);
        }
    }

    fn spawn_fetch(&mut self, kind: ResourceKind) {
        let fetcher = self.fetcher.clone();
        self.fetches.spawn(async move { (kind, fetcher.fetch(kind).await) });
    }

    fn apply(&mut self, kind: ResourceKind, result: Result<Snapshot, SyncError>) {
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(%kind, error = %e, code = e.error_code(), "fetch: failed");
                return;
            }
        };
        let participant_ids = match &snapshot {
            Snapshot::Participants(rows) => Some(rows.iter().map(|p| p.id).collect::<Vec<_>>()),
            _ => None,
        };
        if !self.projection.apply(self.generation, snapshot) {
            debug!(%kind, generation = self.generation, "fetch: stale result discarded");
            return;
        }
        if let Some(ids) = participant_ids {
            self.rescope_progress(ids);
        }
    }

    /// Re-filter the coordinator's progress channel when the roster changes.
    fn rescope_progress(&mut self, mut ids: Vec<Uuid>) {
        if !self.fetcher.scope().is_coordinator() {
            return;
        }
        ids.sort_unstable();
        if ids == self.progress_scope {
            return;
        }
        self.progress_scope = ids;
        if self.channels.status(ResourceKind::Progress) != ChannelStatus::Closed {
            info!(participants = self.progress_scope.len(), "channel: rescoping progress");
            self.open_channel(ResourceKind::Progress);
        }
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn open_channel(&mut self, kind: ResourceKind) {
        let filter = self.fetcher.scope().channel_filter(kind, &self.progress_scope);
        self.channels.open(kind, filter);
    }

    fn publish_degraded(&self) {
        self.degraded.store(self.channels.is_degraded(), Ordering::SeqCst);
    }

    fn stats(&self) -> AttachmentStats {
        AttachmentStats {
            generation: self.generation,
            timers: self.timers.keys(),
            channels: self.channels.open_kinds().into_iter().map(|k| (k, self.channels.status(k))).collect(),
            attempts: self.supervisors.iter().map(|(k, s)| (*k, s.attempts())).collect(),
            polling: self.polling.active(),
            fetches_in_flight: self.fetches.len(),
        }
    }

    async fn teardown(&mut self) {
        self.timers.cancel_all();
        self.polling.deactivate_all(&mut self.timers);
        self.fetches.abort_all();
        let pumps = self.channels.close_all();
        let count = pumps.len();
        if tokio::time::timeout(TEARDOWN_TIMEOUT, futures::future::join_all(pumps)).await.is_err() {
            warn!(channels = count, "attach: channel close timed out");
        }
        while self.fetches.join_next().await.is_some() {}
        self.degraded.store(false, Ordering::SeqCst);
        info!(generation = self.generation, channels = count, "attach: driver stopped");
    }
}

#[cfg(test)]
#[path = "driver_test.rs"]
mod tests;
