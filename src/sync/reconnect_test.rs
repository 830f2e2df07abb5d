use super::*;

fn policy() -> BackoffPolicy {
    BackoffPolicy { base: Duration::from_millis(1000), max: Duration::from_millis(30_000), max_attempts: 5 }
}

/// Drive the supervisor through failures until it stops scheduling.
fn scheduled_delays(sup: &mut ReconnectSupervisor) -> Vec<u64> {
    let mut delays = Vec::new();
    while let Decision::Schedule { delay, .. } = sup.on_degraded() {
        delays.push(u64::try_from(delay.as_millis()).unwrap());
        sup.on_retry_due();
    }
    delays
}

#[test]
fn delay_doubles_and_caps() {
    let p = policy();
    let got: Vec<u128> = (0..7).map(|n| p.delay(n).as_millis()).collect();
    assert_eq!(got, vec![1000, 2000, 4000, 8000, 16_000, 30_000, 30_000]);
    assert_eq!(p.delay(64), Duration::from_millis(30_000));
}

#[test]
fn five_attempts_then_exhausted() {
    let mut sup = ReconnectSupervisor::new(policy());
    assert_eq!(scheduled_delays(&mut sup), vec![1000, 2000, 4000, 8000, 16_000]);
    assert_eq!(sup.phase(), GroupPhase::Exhausted);
    assert_eq!(sup.on_degraded(), Decision::Exhausted);
    assert_eq!(sup.attempts(), 5);
}

#[test]
fn second_degraded_signal_while_waiting_is_ignored() {
    let mut sup = ReconnectSupervisor::new(policy());
    assert!(matches!(sup.on_degraded(), Decision::Schedule { attempt: 1, .. }));
    assert_eq!(sup.on_degraded(), Decision::AlreadyPending);
    assert!(sup.is_pending());
    assert_eq!(sup.attempts(), 0);
}

#[test]
fn success_resets_counter() {
    let mut sup = ReconnectSupervisor::new(policy());
    sup.on_degraded();
    sup.on_retry_due();
    sup.on_degraded();
    sup.on_retry_due();
    assert_eq!(sup.attempts(), 2);
    sup.on_subscribed();
    assert_eq!(sup.phase(), GroupPhase::Idle);
    assert_eq!(sup.on_degraded(), Decision::Schedule { attempt: 1, delay: Duration::from_millis(1000) });
}

#[test]
fn retry_due_without_backoff_is_noop() {
    let mut sup = ReconnectSupervisor::new(policy());
    assert_eq!(sup.on_retry_due(), None);
    assert_eq!(sup.phase(), GroupPhase::Idle);
}

#[test]
fn health_rearm_does_not_grant_fresh_budget() {
    let mut sup = ReconnectSupervisor::new(policy());
    scheduled_delays(&mut sup);
    sup.on_health_rearm();
    assert!(matches!(sup.phase(), GroupPhase::Retrying { attempt: 5 }));
    assert_eq!(sup.on_degraded(), Decision::Exhausted);
}

#[test]
fn health_rearm_after_success_path_resets() {
    let mut sup = ReconnectSupervisor::new(policy());
    scheduled_delays(&mut sup);
    sup.on_health_rearm();
    sup.on_subscribed();
    assert_eq!(sup.attempts(), 0);
}

#[test]
fn health_check_waits_for_pending_backoff() {
    let mut waiting = ReconnectSupervisor::new(policy());
    waiting.on_degraded();
    let mut exhausted = ReconnectSupervisor::new(policy());
    scheduled_delays(&mut exhausted);

    assert!(!should_health_rearm(true, [&waiting, &exhausted].into_iter()));
    assert!(should_health_rearm(true, [&exhausted].into_iter()));
    assert!(!should_health_rearm(false, [&exhausted].into_iter()));
}
