//! Polling fallback controller.
//!
//! While a resource's push channel is degraded, a ticker re-fetches it on a
//! fixed interval. Activation is idempotent per resource: a second activate
//! while one poller runs is a no-op, so repeated degraded signals never
//! stack pollers.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use super::registry::{TimerKey, TimerRegistry, spawn_ticker};
use crate::model::ResourceKind;

/// Per-resource poll periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub tasks: Duration,
    pub progress: Duration,
    pub participants: Duration,
}

impl PollIntervals {
    /// Interval for a live resource; sessions are never polled.
    #[must_use]
    pub fn for_kind(&self, kind: ResourceKind) -> Option<Duration> {
        match kind {
            ResourceKind::Tasks => Some(self.tasks),
            ResourceKind::Progress => Some(self.progress),
            ResourceKind::Participants => Some(self.participants),
            ResourceKind::Sessions => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct PollingController {
    active: BTreeSet<ResourceKind>,
}

impl PollingController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_active(&self, kind: ResourceKind) -> bool {
        self.active.contains(&kind)
    }

    #[must_use]
    pub fn active(&self) -> Vec<ResourceKind> {
        self.active.iter().copied().collect()
    }

    /// Start polling `kind`, posting `make_event(kind)` every `interval`.
    /// Returns false when a poller for `kind` is already running.
    pub fn activate<E>(
        &mut self,
        registry: &mut TimerRegistry,
        kind: ResourceKind,
        interval: Duration,
        events: &mpsc::UnboundedSender<E>,
        make_event: impl FnOnce(ResourceKind) -> E,
    ) -> bool
    where
        E: Clone + Send + 'static,
    {
        if self.active.contains(&kind) && registry.contains(TimerKey::Poll(kind)) {
            return false;
        }
        self.active.insert(kind);
        registry.replace(TimerKey::Poll(kind), spawn_ticker(interval, events.clone(), make_event(kind)));
        info!(%kind, interval_ms = interval.as_millis(), "poll: activated");
        true
    }

    /// Stop polling `kind`. Returns whether a poller was active.
    pub fn deactivate(&mut self, registry: &mut TimerRegistry, kind: ResourceKind) -> bool {
        registry.cancel(TimerKey::Poll(kind));
        let was_active = self.active.remove(&kind);
        if was_active {
            info!(%kind, "poll: deactivated");
        }
        was_active
    }

    pub fn deactivate_all(&mut self, registry: &mut TimerRegistry) {
        for kind in std::mem::take(&mut self.active) {
            registry.cancel(TimerKey::Poll(kind));
        }
    }
}

#[cfg(test)]
#[path = "polling_test.rs"]
mod tests;
