//! Reconnection supervisor.
//!
//! DESIGN
//! ======
//! One supervisor per subscription group (the channel of one resource
//! kind). It is a pure state machine: the driver feeds it channel outcomes
//! and timer firings, and it answers with what to schedule. It never spawns
//! or sleeps itself, which keeps the delay sequence testable without a
//! runtime.
//!
//! ```text
//! Idle --degraded--> Backoff(1) --due--> Retrying(1) --subscribed--> Idle
//!                        ^                    |
//!                        +----degraded--------+  (attempt < cap)
//!                                             |
//!                                             +--degraded--> Exhausted (attempt == cap)
//! ```
//!
//! Attempt `n` (1-based) waits `min(base * 2^(n-1), max)`. Once exhausted
//! only the health check may re-arm the group.

use std::time::Duration;

/// Exponential delay with a ceiling and an attempt cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Delay before retry number `n`, counting from zero.
    #[must_use]
    pub fn delay(&self, n: u32) -> Duration {
        let factor = 2u32.checked_pow(n).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).map_or(self.max, |d| d.min(self.max))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPhase {
    Idle,
    /// Waiting for the timer that starts `attempt`.
    Backoff { attempt: u32 },
    /// `attempt` is in flight.
    Retrying { attempt: u32 },
    /// The cap was reached; only the health check re-arms.
    Exhausted,
}

/// What the caller should do after reporting a degraded channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Schedule { attempt: u32, delay: Duration },
    AlreadyPending,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct ReconnectSupervisor {
    policy: BackoffPolicy,
    phase: GroupPhase,
}

impl ReconnectSupervisor {
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, phase: GroupPhase::Idle }
    }

    #[must_use]
    pub fn phase(&self) -> GroupPhase {
        self.phase
    }

    /// Number of automatic attempts started since the last success.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self.phase {
            GroupPhase::Idle => 0,
            GroupPhase::Backoff { attempt } => attempt - 1,
            GroupPhase::Retrying { attempt } => attempt,
            GroupPhase::Exhausted => self.policy.max_attempts,
        }
    }

    /// True while a backoff timer is armed or an attempt is in flight.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.phase, GroupPhase::Backoff { .. } | GroupPhase::Retrying { .. })
    }

    /// The group's channel went degraded.
    pub fn on_degraded(&mut self) -> Decision {
        let next = match self.phase {
            GroupPhase::Idle => 1,
            GroupPhase::Retrying { attempt } => attempt + 1,
            GroupPhase::Backoff { .. } => return Decision::AlreadyPending,
            GroupPhase::Exhausted => return Decision::Exhausted,
        };
        if next > self.policy.max_attempts {
            self.phase = GroupPhase::Exhausted;
            return Decision::Exhausted;
        }
        self.phase = GroupPhase::Backoff { attempt: next };
        Decision::Schedule { attempt: next, delay: self.policy.delay(next - 1) }
    }

    /// The backoff timer fired. Returns the attempt to start, if any.
    pub fn on_retry_due(&mut self) -> Option<u32> {
        match self.phase {
            GroupPhase::Backoff { attempt } => {
                self.phase = GroupPhase::Retrying { attempt };
                Some(attempt)
            }
            _ => None,
        }
    }

    /// The channel reached SUBSCRIBED. Resets the attempt counter.
    pub fn on_subscribed(&mut self) {
        self.phase = GroupPhase::Idle;
    }

    /// The health check reopened the group. The attempt count is kept so
    /// a still-broken store does not get a fresh fast-retry budget.
    pub fn on_health_rearm(&mut self) {
        if self.phase == GroupPhase::Exhausted {
            self.phase = GroupPhase::Retrying { attempt: self.policy.max_attempts };
        }
    }
}

/// Health check decision: reopen everything when degraded and no fast
/// backoff timer is armed for any group.
#[must_use]
pub fn should_health_rearm<'a>(degraded: bool, mut groups: impl Iterator<Item = &'a ReconnectSupervisor>) -> bool {
    degraded && !groups.any(|g| matches!(g.phase(), GroupPhase::Backoff { .. }))
}

#[cfg(test)]
#[path = "reconnect_test.rs"]
mod tests;
