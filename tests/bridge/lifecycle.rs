//! Opening, closing and timing out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use docbridge::{
    Bridge, BridgeBuilder, BridgeConfig, BridgeError, LifecycleError, LockRegistry, LockRelease,
    Operation, Outcome, ResourceId, TimeoutStage,
};
use serde_json::json;

use crate::support::{eventually, verify_db_file, Fixture, Probe, ProbeOptions, ProbeStore};

fn slow(fixture: &Fixture, probe: &Arc<Probe>, delay: Duration) -> BridgeBuilder<ProbeStore> {
    BridgeBuilder::<ProbeStore>::new()
        .path(&fixture.path)
        .options(ProbeOptions {
            probe: Arc::clone(probe),
            delay,
        })
}

// ============================================================================
// Test 1: Open and close
// ============================================================================

#[tokio::test]
async fn identity_is_the_path_text() {
    let fixture = Fixture::empty();
    let bridge = fixture.open().await;
    assert_eq!(
        bridge.identity(),
        &ResourceId::from(fixture.path.to_string_lossy().into_owned())
    );
    assert_eq!(bridge.path(), Some(fixture.path.as_path()));
    assert!(fixture.path.exists());
}

#[tokio::test]
async fn store_is_closed_exactly_once() {
    let fixture = Fixture::empty();
    let probe = Arc::new(Probe::default());

    let bridge = slow(&fixture, &probe, Duration::ZERO).open().await.unwrap();
    bridge.close().await.unwrap();
    bridge.close().await.unwrap();
    drop(bridge);
    assert_eq!(probe.opens(), 1);
    assert_eq!(probe.closes(), 1);

    let bridge = slow(&fixture, &probe, Duration::ZERO).open().await.unwrap();
    bridge.enter().await.unwrap();
    drop(bridge);
    assert_eq!(probe.opens(), 2);
    assert!(eventually(|| probe.closes() == 2).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(probe.closes(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_waits_for_other_gateways_on_the_file() {
    let fixture = Fixture::empty();
    let probe = Arc::new(Probe::default());

    let busy = Arc::new(
        slow(&fixture, &probe, Duration::from_millis(300))
            .open()
            .await
            .unwrap(),
    );
    let closing = slow(&fixture, &probe, Duration::ZERO).open().await.unwrap();

    let running = {
        let busy = Arc::clone(&busy);
        tokio::spawn(async move { busy.insert(json!({"n": 1})).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    drop(closing);
    assert!(started.elapsed() < Duration::from_millis(50));

    // the insert still holds the file's lock; the close has to queue behind it
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(probe.closes(), 0);

    assert_eq!(running.await.unwrap().unwrap(), docbridge::DocId(1));
    assert!(eventually(|| probe.closes() == 1).await);
    assert_eq!(probe.peak(), 1);
}

#[tokio::test]
async fn never_opened_bridges_do_not_touch_the_store() {
    let fixture = Fixture::empty();
    let probe = Arc::new(Probe::default());

    let bridge = slow(&fixture, &probe, Duration::ZERO).build();
    let err = bridge.insert(json!({"a": 1})).await.unwrap_err();
    assert!(matches!(err, BridgeError::Lifecycle(LifecycleError::NotOpen { .. })));
    drop(bridge);

    assert_eq!(probe.opens(), 0);
    assert_eq!(probe.closes(), 0);
}

#[tokio::test]
async fn calls_after_close_fail() {
    let fixture = Fixture::seeded();
    let bridge = fixture.open().await;
    assert_eq!(bridge.invoke(Operation::Close).await.unwrap(), Outcome::Unit);

    let err = bridge.all().await.unwrap_err();
    assert!(matches!(err, BridgeError::Lifecycle(LifecycleError::Closed { .. })));
    assert!(bridge.enter().await.unwrap_err().is_lifecycle());
    verify_db_file(&fixture.path);
}

#[tokio::test]
async fn corrupt_files_surface_as_store_failures() {
    let fixture = Fixture::empty();
    std::fs::write(&fixture.path, "{\"_default\": [").unwrap();

    let bridge = fixture.open().await;
    let err = bridge.all().await.unwrap_err();
    assert!(err.store_error().is_some());
    assert!(!err.is_timeout());
}

#[tokio::test]
async fn registry_forgets_files_nobody_uses() {
    let fixture = Fixture::empty();
    let registry = Arc::new(LockRegistry::new());
    let identity = ResourceId::from_path(Some(fixture.path.as_path()));

    let bridge = Bridge::builder()
        .path(&fixture.path)
        .lock_manager(registry.clone())
        .open()
        .await
        .unwrap();
    let other = Bridge::builder()
        .path(&fixture.path)
        .lock_manager(registry.clone())
        .build();
    assert_eq!(registry.live_identities(), vec![identity.clone()]);

    drop(bridge);
    assert_eq!(registry.live_identities(), vec![identity]);
    drop(other);
    // the close queued by dropping `bridge` holds the lock until it has run
    assert!(eventually(|| registry.live_identities().is_empty()).await);
    assert_eq!(registry.prune(), 1);
    assert!(registry.is_empty());
}

// ============================================================================
// Test 2: Timeouts
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_calls_time_out_without_blocking_the_caller() {
    let fixture = Fixture::empty();
    let probe = Arc::new(Probe::default());
    let bridge = slow(&fixture, &probe, Duration::from_millis(400))
        .timeout(Duration::from_millis(50))
        .open()
        .await
        .unwrap();

    let started = Instant::now();
    let err = bridge.insert(json!({"a": 1})).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(matches!(
        err,
        BridgeError::Timeout {
            operation: "insert",
            stage: TimeoutStage::Execute,
            ..
        }
    ));
    assert!(err.to_string().contains("timed out"));

    // the abandoned call still completes in the background
    tokio::time::sleep(Duration::from_millis(600)).await;
    verify_db_file(&fixture.path);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn release_on_completion_keeps_other_gateways_out() {
    let fixture = Fixture::empty();
    let probe = Arc::new(Probe::default());
    let config = BridgeConfig {
        timeout: Duration::from_millis(50),
        lock_timeout: None,
        lock_release: LockRelease::OnCompletion,
    };

    let first = slow(&fixture, &probe, Duration::from_millis(300))
        .config(config.clone())
        .open()
        .await
        .unwrap();
    let second = slow(&fixture, &probe, Duration::ZERO)
        .config(BridgeConfig {
            timeout: Duration::from_secs(5),
            ..config
        })
        .open()
        .await
        .unwrap();

    assert!(first.insert(json!({"n": 1})).await.unwrap_err().is_timeout());

    let started = Instant::now();
    assert_eq!(second.count(docbridge::Query::noop()).await.unwrap(), 1);
    // waited for the abandoned insert before it could run, and saw its write
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(probe.peak(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lock_wait_can_time_out() {
    let fixture = Fixture::empty();
    let probe = Arc::new(Probe::default());

    let busy = Arc::new(
        slow(&fixture, &probe, Duration::from_millis(300))
            .open()
            .await
            .unwrap(),
    );
    let impatient = slow(&fixture, &probe, Duration::ZERO)
        .lock_timeout(Duration::from_millis(50))
        .open()
        .await
        .unwrap();

    let running = {
        let busy = Arc::clone(&busy);
        tokio::spawn(async move { busy.insert(json!({"n": 1})).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = impatient.all().await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Timeout {
            stage: TimeoutStage::Acquire,
            ..
        }
    ));
    assert_eq!(running.await.unwrap().unwrap(), docbridge::DocId(1));
}
