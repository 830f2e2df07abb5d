use super::*;
use tokio::time::Instant;

fn intervals() -> PollIntervals {
    PollIntervals {
        tasks: Duration::from_secs(5),
        progress: Duration::from_secs(5),
        participants: Duration::from_secs(10),
    }
}

#[test]
fn sessions_are_never_polled() {
    assert_eq!(intervals().for_kind(ResourceKind::Sessions), None);
    assert_eq!(intervals().for_kind(ResourceKind::Participants), Some(Duration::from_secs(10)));
}

#[tokio::test(start_paused = true)]
async fn activation_is_idempotent() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut registry = TimerRegistry::new();
    let mut polling = PollingController::new();

    assert!(polling.activate(&mut registry, ResourceKind::Progress, Duration::from_secs(5), &tx, |k| k));
    assert!(!polling.activate(&mut registry, ResourceKind::Progress, Duration::from_secs(5), &tx, |k| k));
    assert_eq!(registry.len(), 1);

    let start = Instant::now();
    tokio::time::sleep(Duration::from_millis(15_500)).await;
    let mut ticks = 0;
    while rx.try_recv().is_ok() {
        ticks += 1;
    }
    assert_eq!(ticks, 3, "one poller, one tick per interval");
    assert!(start.elapsed() >= Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn pollers_run_per_resource() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut registry = TimerRegistry::new();
    let mut polling = PollingController::new();
    polling.activate(&mut registry, ResourceKind::Tasks, Duration::from_secs(5), &tx, |k| k);
    polling.activate(&mut registry, ResourceKind::Participants, Duration::from_secs(10), &tx, |k| k);
    assert_eq!(polling.active(), vec![ResourceKind::Tasks, ResourceKind::Participants]);
    assert_eq!(registry.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn deactivate_stops_ticks() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut registry = TimerRegistry::new();
    let mut polling = PollingController::new();
    polling.activate(&mut registry, ResourceKind::Tasks, Duration::from_secs(5), &tx, |k| k);
    assert!(polling.deactivate(&mut registry, ResourceKind::Tasks));
    assert!(!polling.deactivate(&mut registry, ResourceKind::Tasks));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(rx.try_recv().is_err());
    assert!(!polling.is_active(ResourceKind::Tasks));
}

#[tokio::test(start_paused = true)]
async fn deactivate_all_clears_registry() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut registry = TimerRegistry::new();
    let mut polling = PollingController::new();
    for kind in ResourceKind::LIVE {
        polling.activate(&mut registry, kind, Duration::from_secs(5), &tx, |k| k);
    }
    polling.deactivate_all(&mut registry);
    assert!(registry.is_empty());
    assert!(polling.active().is_empty());
}
