//! Participant heartbeat.
//!
//! While a participant is attached, their `last_seen` is bumped every
//! period. A failed write is logged and dropped; the next tick is the
//! retry. The task stops itself once its attachment generation is gone,
//! and the driver aborts it at teardown through the timer registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use super::projection::ProjectionStore;
use crate::services::participant::touch_last_seen;
use crate::store::RemoteStore;

pub fn spawn_heartbeat(
    store: Arc<dyn RemoteStore>,
    projection: Arc<ProjectionStore>,
    generation: u64,
    participant_id: Uuid,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !projection.is_current(generation) {
                debug!(%participant_id, generation, "heartbeat: attachment gone, stopping");
                break;
            }
            if let Err(e) = touch_last_seen(store.as_ref(), participant_id).await {
                warn!(%participant_id, error = %e, "heartbeat: last_seen update failed");
            }
        }
    })
}

#[cfg(test)]
#[path = "heartbeat_test.rs"]
mod tests;
