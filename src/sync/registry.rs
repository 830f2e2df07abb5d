//! Timer registry owned by one attachment.
//!
//! Every periodic or one-shot timer of an attachment is a spawned task that
//! only posts an event back to the driver. The registry holds their handles
//! by key so a timer can be replaced, cancelled, or swept at teardown.
//! Dropping the registry aborts whatever is left.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::model::ResourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    Heartbeat,
    HealthCheck,
    Poll(ResourceKind),
    Backoff(ResourceKind),
}

#[derive(Debug, Default)]
pub struct TimerRegistry {
    timers: HashMap<TimerKey, JoinHandle<()>>,
}

impl TimerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a timer under `key` is still running.
    #[must_use]
    pub fn contains(&self, key: TimerKey) -> bool {
        self.timers.get(&key).is_some_and(|h| !h.is_finished())
    }

    /// Install `handle` under `key`, aborting any timer it replaces.
    pub fn replace(&mut self, key: TimerKey, handle: JoinHandle<()>) {
        if let Some(old) = self.timers.insert(key, handle) {
            old.abort();
        }
    }

    /// Abort the timer under `key`. Returns whether one was registered.
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        self.timers.remove(&key).map(|h| h.abort()).is_some()
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    /// Count of timers that have not finished.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.values().filter(|h| !h.is_finished()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of live timers, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<TimerKey> {
        let mut keys: Vec<TimerKey> =
            self.timers.iter().filter(|(_, h)| !h.is_finished()).map(|(k, _)| *k).collect();
        keys.sort();
        keys
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Post `event` every `period`, first after one full period. Stops when the
/// receiver is gone.
pub fn spawn_ticker<E>(period: Duration, events: mpsc::UnboundedSender<E>, event: E) -> JoinHandle<()>
where
    E: Clone + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if events.send(event.clone()).is_err() {
                break;
            }
        }
    })
}

/// Post `event` once after `delay`.
pub fn spawn_delay<E>(delay: Duration, events: mpsc::UnboundedSender<E>, event: E) -> JoinHandle<()>
where
    E: Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = events.send(event);
    })
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
