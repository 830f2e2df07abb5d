//! Channel manager: one push subscription per live resource kind.
//!
//! DESIGN
//! ======
//! Each open channel is a pump task that owns its store subscription. The
//! pump translates store statuses into channel transitions, enforces the
//! subscribe timeout, and forwards change notices as bare "changed"
//! signals; payloads are never trusted. On close it unsubscribes.
//!
//! ```text
//! CONNECTING --ack--> SUBSCRIBED
//! CONNECTING/SUBSCRIBED --timed out | channel error | no ack in time--> DEGRADED
//! DEGRADED --late ack--> SUBSCRIBED
//! any --close--> CLOSED
//! ```
//!
//! The manager only tracks handles. Signals are tagged with a
//! [`ChannelId`]; once a handle is closed or replaced, signals from its
//! pump are rejected by [`ChannelManager::accept`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::ResourceKind;
use crate::store::{Filter, RemoteStore, StoreEvent, StoreStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Subscribed,
    Degraded,
    Closed,
}

impl ChannelStatus {
    /// Transition for a store-reported status, or `None` to stay put.
    #[must_use]
    pub fn on_store_status(self, status: StoreStatus) -> Option<ChannelStatus> {
        match (self, status) {
            (Self::Closed, _) | (_, StoreStatus::Connecting) => None,
            (Self::Connecting | Self::Degraded, StoreStatus::Subscribed) => Some(Self::Subscribed),
            (Self::Connecting | Self::Subscribed, StoreStatus::TimedOut | StoreStatus::ChannelError | StoreStatus::Closed) => {
                Some(Self::Degraded)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSignal {
    Status(ChannelStatus),
    Changed,
}

/// A signal from one pump, tagged with its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelEvent {
    pub channel: ChannelId,
    pub kind: ResourceKind,
    pub signal: ChannelSignal,
}

struct ChannelHandle {
    id: ChannelId,
    name: String,
    status: ChannelStatus,
    close_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct ChannelManager {
    store: Arc<dyn RemoteStore>,
    session_id: Uuid,
    subscribe_timeout: Duration,
    events: mpsc::UnboundedSender<ChannelEvent>,
    handles: BTreeMap<ResourceKind, ChannelHandle>,
    /// Pumps of replaced channels, still unsubscribing.
    retired: Vec<JoinHandle<()>>,
    next_id: u64,
}

impl ChannelManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn RemoteStore>,
        session_id: Uuid,
        subscribe_timeout: Duration,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        Self { store, session_id, subscribe_timeout, events, handles: BTreeMap::new(), retired: Vec::new(), next_id: 0 }
    }

    /// Open a channel for `kind`, replacing any channel it already has.
    /// The replaced pump is kept until [`ChannelManager::close_all`].
    pub fn open(&mut self, kind: ResourceKind, filter: Filter) -> ChannelId {
        self.retired.retain(|task| !task.is_finished());
        if let Some(replaced) = self.close(kind) {
            self.retired.push(replaced);
        }
        self.next_id += 1;
        let id = ChannelId(self.next_id);
        let name = format!("{}_{}_{}", kind.table(), self.session_id, Uuid::new_v4());
        let (close_tx, close_rx) = oneshot::channel();

        info!(%kind, %id, channel = %name, %filter, "channel: opening");
        let pump = Pump {
            store: Arc::clone(&self.store),
            kind,
            filter,
            name: name.clone(),
            id,
            subscribe_timeout: self.subscribe_timeout,
            events: self.events.clone(),
        };
        let task = tokio::spawn(pump.run(close_rx));
        self.handles.insert(kind, ChannelHandle { id, name, status: ChannelStatus::Connecting, close_tx, task });
        id
    }

    /// Close the channel of `kind`. Returns the pump handle so the caller
    /// may wait for the unsubscribe to finish.
    pub fn close(&mut self, kind: ResourceKind) -> Option<JoinHandle<()>> {
        let handle = self.handles.remove(&kind)?;
        let _ = handle.close_tx.send(());
        debug!(%kind, id = %handle.id, channel = %handle.name, "channel: closed");
        Some(handle.task)
    }

    /// Close every channel. Returns the pumps of both current and replaced
    /// channels.
    pub fn close_all(&mut self) -> Vec<JoinHandle<()>> {
        let kinds: Vec<ResourceKind> = self.handles.keys().copied().collect();
        let mut pumps = std::mem::take(&mut self.retired);
        pumps.extend(kinds.into_iter().filter_map(|kind| self.close(kind)));
        pumps
    }

    /// Record a pump signal. Returns false when it came from a channel that
    /// is no longer current.
    pub fn accept(&mut self, event: &ChannelEvent) -> bool {
        let Some(handle) = self.handles.get_mut(&event.kind) else {
            return false;
        };
        if handle.id != event.channel {
            return false;
        }
        if let ChannelSignal::Status(status) = event.signal {
            handle.status = status;
        }
        true
    }

    #[must_use]
    pub fn status(&self, kind: ResourceKind) -> ChannelStatus {
        self.handles.get(&kind).map_or(ChannelStatus::Closed, |h| h.status)
    }

    #[must_use]
    pub fn owns(&self, id: ChannelId) -> bool {
        self.handles.values().any(|h| h.id == id)
    }

    #[must_use]
    pub fn degraded_kinds(&self) -> Vec<ResourceKind> {
        self.handles.iter().filter(|(_, h)| h.status == ChannelStatus::Degraded).map(|(k, _)| *k).collect()
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.handles.values().any(|h| h.status == ChannelStatus::Degraded)
    }

    #[must_use]
    pub fn open_kinds(&self) -> Vec<ResourceKind> {
        self.handles.keys().copied().collect()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.handles.values().map(|h| h.name.clone()).collect()
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        for (_, handle) in std::mem::take(&mut self.handles) {
            let _ = handle.close_tx.send(());
        }
    }
}

// =============================================================================
// PUMP
// =============================================================================

struct Pump {
    store: Arc<dyn RemoteStore>,
    kind: ResourceKind,
    filter: Filter,
    name: String,
    id: ChannelId,
    subscribe_timeout: Duration,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl Pump {
    fn post(&self, signal: ChannelSignal) -> bool {
        self.events.send(ChannelEvent { channel: self.id, kind: self.kind, signal }).is_ok()
    }

    async fn run(self, mut close_rx: oneshot::Receiver<()>) {
        let kind = self.kind;
        let subscribed = tokio::select! {
            _ = &mut close_rx => return,
            result = self.store.subscribe(kind, &self.filter, &self.name) => result,
        };
        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(%kind, id = %self.id, error = %e, "channel: subscribe failed");
                self.post(ChannelSignal::Status(ChannelStatus::Degraded));
                return;
            }
        };

        let mut status = ChannelStatus::Connecting;
        let deadline = tokio::time::sleep(self.subscribe_timeout);
        tokio::pin!(deadline);

        loop {
            let next = tokio::select! {
                _ = &mut close_rx => break,
                () = &mut deadline, if status == ChannelStatus::Connecting => {
                    warn!(%kind, id = %self.id, timeout_ms = self.subscribe_timeout.as_millis(), "channel: no ack before timeout");
                    Some(ChannelStatus::Degraded)
                }
                event = subscription.events.recv() => match event {
                    Some(StoreEvent::Status(reported)) => {
                        debug!(%kind, id = %self.id, ?reported, "channel: store status");
                        status.on_store_status(reported)
                    }
                    Some(StoreEvent::Change { event, .. }) => {
                        debug!(%kind, id = %self.id, ?event, "channel: change notice");
                        if !self.post(ChannelSignal::Changed) {
                            break;
                        }
                        None
                    }
                    None => {
                        warn!(%kind, id = %self.id, "channel: store ended subscription");
                        if status != ChannelStatus::Degraded {
                            self.post(ChannelSignal::Status(ChannelStatus::Degraded));
                        }
                        let _ = (&mut close_rx).await;
                        break;
                    }
                },
            };
            if let Some(next) = next {
                status = next;
                match next {
                    ChannelStatus::Subscribed => info!(%kind, id = %self.id, "channel: subscribed"),
                    ChannelStatus::Degraded => warn!(%kind, id = %self.id, "channel: degraded"),
                    _ => {}
                }
                if !self.post(ChannelSignal::Status(next)) {
                    break;
                }
            }
        }

        if let Err(e) = self.store.unsubscribe(subscription.id).await {
            warn!(%kind, id = %self.id, error = %e, "channel: unsubscribe failed");
        }
    }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
