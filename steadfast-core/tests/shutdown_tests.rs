use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use steadfast_core::{
    CancellationToken, DrainError, ShutdownConfig, ShutdownCoordinator, ShutdownPhase,
};
use tokio::time::{sleep, Instant};

fn coordinator(drain_period: Duration) -> Arc<ShutdownCoordinator> {
    Arc::new(ShutdownCoordinator::new(
        ShutdownConfig::default().with_drain_period(drain_period),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_request_is_admitted_after_drain_completes() {
    let coordinator = coordinator(Duration::from_secs(5));
    let finished = Arc::new(AtomicU32::new(0));
    let admitted = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..64 {
        let coordinator = coordinator.clone();
        let finished = finished.clone();
        let admitted = admitted.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                if let Some(guard) = coordinator.try_track() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    drop(guard);
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    sleep(Duration::from_millis(5)).await;
    let result = coordinator.wait_for_drain(&CancellationToken::new()).await;
    assert!(result.is_ok());

    // Everything admitted before the drain finished has completed.
    let admitted_at_drain = admitted.load(Ordering::SeqCst);
    assert_eq!(finished.load(Ordering::SeqCst), admitted_at_drain);
    assert_eq!(coordinator.active_count(), 0);

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(admitted.load(Ordering::SeqCst), admitted_at_drain);
    assert_eq!(coordinator.phase(), ShutdownPhase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_drain_waits_for_slowest_request() {
    let coordinator = coordinator(Duration::from_secs(1));

    for delay_ms in [10u64, 40, 250] {
        let guard = coordinator.track();
        tokio::spawn(async move {
            sleep(Duration::from_millis(delay_ms)).await;
            drop(guard);
        });
    }
    assert_eq!(coordinator.active_count(), 3);

    let started = Instant::now();
    coordinator
        .wait_for_drain(&CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(250));
    assert!(started.elapsed() < Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_drain_deadline_counts_from_initiation() {
    let coordinator = coordinator(Duration::from_millis(100));
    let _stuck = coordinator.track();

    coordinator.initiate_shutdown();
    sleep(Duration::from_millis(80)).await;

    let started = Instant::now();
    let result = coordinator.wait_for_drain(&CancellationToken::new()).await;

    assert!(matches!(result, Err(DrainError::Timeout { active: 1, .. })));
    assert!(started.elapsed() <= Duration::from_millis(25));
}
