//! Coordinator Integration Tests
//!
//! These tests drive a `FlushCoordinator` through its public API with scripted
//! delivery collaborators. Time is paused, so throttle windows and contention
//! ticks advance instantly and deterministically.
//!
//! ## What These Tests Verify
//!
//! - Burst appends ship as one ordered batch
//! - Failed deliveries keep the buffer and release the sync gate
//! - A sync that outlasts the contention window drops the entry
//! - `clear` empties the buffer and its persisted copy
//! - Appends are recorded without `start` and survive dropping the handle
//! - Restart recovery through the redb store

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use logflush_core::{
    CoordinatorConfig, CoordinatorEvent, Delivery, DeliveryError, DiskStore, FlushCoordinator,
    FlushError, FlushOutcome, LogEntry, LogLevel, MemoryStore, Persistence,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::time::{sleep, Duration, Instant};

// ============================================================================
// Scripted Deliveries
// ============================================================================

/// Accepts every batch and remembers it.
#[derive(Default)]
struct Recording {
    batches: Mutex<Vec<Vec<LogEntry>>>,
}

impl Recording {
    fn batches(&self) -> Vec<Vec<LogEntry>> {
        self.batches.lock().clone()
    }

    fn delivered(&self) -> Vec<LogEntry> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl Delivery for Recording {
    async fn deliver(&self, entries: &[LogEntry]) -> Result<(), DeliveryError> {
        self.batches.lock().push(entries.to_vec());
        Ok(())
    }
}

/// Rejects every batch while `failing` is set.
struct Flaky {
    failing: AtomicBool,
    attempts: AtomicUsize,
    inner: Recording,
}

impl Flaky {
    fn failing() -> Self {
        Self {
            failing: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            inner: Recording::default(),
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Delivery for Flaky {
    async fn deliver(&self, entries: &[LogEntry]) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Rejected("collector offline".into()));
        }
        self.inner.deliver(entries).await
    }
}

/// Holds each delivery until released.
#[derive(Default)]
struct Gated {
    started: Notify,
    release: Notify,
    fail: AtomicBool,
}

#[async_trait]
impl Delivery for Gated {
    async fn deliver(&self, _entries: &[LogEntry]) -> Result<(), DeliveryError> {
        self.started.notify_one();
        self.release.notified().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeliveryError::Server(503));
        }
        Ok(())
    }
}

fn entry(n: i64) -> LogEntry {
    LogEntry::build(LogLevel::Info, &format!("entry {}", n), &json!({ "n": n }), Map::new())
        .unwrap()
}

fn numbers(entries: &[LogEntry]) -> Vec<i64> {
    entries
        .iter()
        .map(|e| e.get("n").and_then(Value::as_i64).unwrap())
        .collect()
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<CoordinatorEvent>) -> Vec<CoordinatorEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_burst_of_appends_ships_as_one_batch() {
    let delivery = Arc::new(Recording::default());
    let coordinator = FlushCoordinator::builder()
        .sync_interval(Duration::from_millis(5000))
        .delivery(delivery.clone())
        .build()
        .unwrap();
    coordinator.start();

    coordinator.info("entry 1", &json!({ "n": 1 }));
    coordinator.info("entry 2", &json!({ "n": 2 }));
    coordinator.info("entry 3", &json!({ "n": 3 }));

    sleep(Duration::from_secs(6)).await;

    let batches = delivery.batches();
    assert_eq!(batches.len(), 1, "burst should coalesce into one delivery");
    assert_eq!(numbers(&batches[0]), vec![1, 2, 3]);
    assert_eq!(coordinator.count(), 0);

    coordinator.stop();
}

#[tokio::test(start_paused = true)]
async fn test_failed_delivery_keeps_buffer_and_releases_gate() {
    let delivery = Arc::new(Flaky::failing());
    let coordinator = FlushCoordinator::builder()
        .delivery(delivery.clone())
        .build()
        .unwrap();
    let mut events = coordinator.subscribe();

    coordinator.record(entry(1)).await.unwrap();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(coordinator.count(), 1);
    assert!(!coordinator.is_syncing());
    assert!(delivery.attempts() >= 1);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, CoordinatorEvent::DeliveryFailed { count: 1, .. })));

    // The next explicit attempt succeeds and ships the kept entry
    delivery.failing.store(false, Ordering::SeqCst);
    assert_eq!(coordinator.flush().await.unwrap(), FlushOutcome::Delivered(1));
    assert_eq!(numbers(&delivery.inner.delivered()), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_long_sync_drops_entry_after_contention_ceiling() {
    let delivery = Arc::new(Gated::default());
    let coordinator = FlushCoordinator::builder()
        .delivery(delivery.clone())
        .build()
        .unwrap();
    let mut events = coordinator.subscribe();

    coordinator.record(entry(1)).await.unwrap();
    delivery.started.notified().await;
    assert!(coordinator.is_syncing());

    let started = Instant::now();
    let err = coordinator.record(entry(2)).await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        FlushError::SyncContentionExceeded { attempts, waited } => {
            assert_eq!(attempts, 10);
            assert_eq!(waited, Duration::from_secs(10));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    assert_eq!(coordinator.count(), 1);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, CoordinatorEvent::ContentionExceeded { attempts: 10 })));

    delivery.release.notify_one();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(coordinator.count(), 0);
    assert!(!coordinator.is_syncing());
}

#[tokio::test(start_paused = true)]
async fn test_clear_empties_buffer_and_store() {
    let store = MemoryStore::new();
    let coordinator = FlushCoordinator::builder()
        .persistence(store.clone())
        .delivery(Flaky::failing())
        .build()
        .unwrap();
    let mut events = coordinator.subscribe();

    coordinator.record(entry(1)).await.unwrap();
    coordinator.record(entry(2)).await.unwrap();
    assert_eq!(store.snapshot().len(), 2);

    coordinator.clear().await;

    assert_eq!(coordinator.count(), 0);
    assert!(store.snapshot().is_empty());
    assert_eq!(store.writes(), 3);
    assert!(drain(&mut events).contains(&CoordinatorEvent::Cleared));
}

#[tokio::test(start_paused = true)]
async fn test_append_during_long_sync_reports_contention() {
    let delivery = Arc::new(Gated::default());
    let coordinator = FlushCoordinator::builder()
        .delivery(delivery.clone())
        .build()
        .unwrap();
    let mut events = coordinator.subscribe();

    coordinator.info("entry 1", &json!({ "n": 1 }));
    delivery.started.notified().await;

    // The caller never waits; the worker gives up on its own
    coordinator.info("entry 2", &json!({ "n": 2 }));
    sleep(Duration::from_secs(11)).await;

    assert_eq!(coordinator.count(), 1);
    let seen = drain(&mut events);
    let dropped: Vec<_> = seen.iter().filter(|e| e.is_data_loss()).collect();
    assert_eq!(dropped, vec![&CoordinatorEvent::ContentionExceeded { attempts: 10 }]);

    delivery.release.notify_one();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(coordinator.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_clear_keeps_going_when_persist_fails() {
    let store = MemoryStore::new();
    let coordinator = FlushCoordinator::builder()
        .persistence(store.clone())
        .delivery(Flaky::failing())
        .build()
        .unwrap();

    coordinator.record(entry(1)).await.unwrap();
    coordinator.record(entry(2)).await.unwrap();
    let mut events = coordinator.subscribe();

    store.set_failing(true);
    coordinator.clear().await;

    // Memory is authoritative; the stale copy stays until the next persist
    assert_eq!(coordinator.count(), 0);
    assert_eq!(numbers(&store.snapshot()), vec![1, 2]);
    let seen: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, CoordinatorEvent::PersistFailed { .. } | CoordinatorEvent::Cleared))
        .collect();
    assert_eq!(seen.len(), 2);
    assert!(matches!(seen[0], CoordinatorEvent::PersistFailed { buffered: 0, .. }));
    assert_eq!(seen[1], CoordinatorEvent::Cleared);

    store.set_failing(false);
    coordinator.record(entry(3)).await.unwrap();
    assert_eq!(numbers(&store.snapshot()), vec![3]);
}

// ============================================================================
// Sync Gate Properties
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_flush_reports_already_syncing() {
    let delivery = Arc::new(Gated::default());
    let coordinator = FlushCoordinator::builder()
        .delivery(delivery.clone())
        .build()
        .unwrap();

    coordinator.record(entry(1)).await.unwrap();
    delivery.started.notified().await;

    assert_eq!(coordinator.flush().await.unwrap(), FlushOutcome::AlreadySyncing);

    delivery.release.notify_one();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(coordinator.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_sync_keeps_entries_recorded_while_it_ran() {
    let store = MemoryStore::new();
    let delivery = Arc::new(Gated::default());
    delivery.fail.store(true, Ordering::SeqCst);
    let coordinator = FlushCoordinator::builder()
        .persistence(store.clone())
        .delivery(delivery.clone())
        .build()
        .unwrap();

    coordinator.record(entry(1)).await.unwrap();
    delivery.started.notified().await;

    let late = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.record(entry(2)).await })
    };
    sleep(Duration::from_millis(10)).await;
    assert_eq!(store.snapshot().len(), 1, "record must wait while syncing");

    delivery.release.notify_one();
    late.await.unwrap().unwrap();

    assert_eq!(numbers(&coordinator.entries().await), vec![1, 2]);
    assert_eq!(numbers(&store.snapshot()), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_trailing_sync_picks_up_window_appends() {
    let delivery = Arc::new(Recording::default());
    let coordinator = FlushCoordinator::builder()
        .delivery(delivery.clone())
        .build()
        .unwrap();

    coordinator.record(entry(1)).await.unwrap();
    sleep(Duration::from_millis(1)).await;
    for n in 2..=10 {
        coordinator.record(entry(n)).await.unwrap();
    }
    sleep(Duration::from_secs(6)).await;

    let batches = delivery.batches();
    assert_eq!(batches.len(), 2, "one leading and one trailing delivery");
    assert_eq!(numbers(&batches[0]), vec![1]);
    assert_eq!(numbers(&batches[1]), (2..=10).collect::<Vec<_>>());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_ticker_retries_until_stopped() {
    let delivery = Arc::new(Flaky::failing());
    let coordinator = FlushCoordinator::builder()
        .delivery(delivery.clone())
        .build()
        .unwrap();
    coordinator.start();

    coordinator.record(entry(1)).await.unwrap();
    sleep(Duration::from_millis(5500)).await;
    let before_stop = delivery.attempts();
    assert!(before_stop >= 2, "ticker should retry the failed buffer");

    coordinator.stop();
    sleep(Duration::from_secs(30)).await;

    assert_eq!(delivery.attempts(), before_stop);
    assert_eq!(coordinator.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_queue_and_flushes() {
    let delivery = Arc::new(Recording::default());
    let coordinator = FlushCoordinator::builder()
        .delivery(delivery.clone())
        .build()
        .unwrap();
    coordinator.start();

    for n in 1..=3 {
        coordinator.info(&format!("entry {}", n), &json!({ "n": n }));
    }
    let handle = coordinator.clone();
    let outcome = coordinator.shutdown().await.unwrap();

    assert!(matches!(outcome, FlushOutcome::Delivered(_) | FlushOutcome::Empty));
    assert_eq!(numbers(&delivery.delivered()), vec![1, 2, 3]);
    assert_eq!(handle.count(), 0);
    assert!(!handle.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_append_without_start_is_recorded() {
    let delivery = Arc::new(Recording::default());
    let coordinator = FlushCoordinator::builder()
        .delivery(delivery.clone())
        .build()
        .unwrap();

    coordinator.info("entry 1", &json!({ "n": 1 }));
    sleep(Duration::from_secs(1)).await;

    assert!(!coordinator.is_running());
    assert_eq!(numbers(&delivery.delivered()), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_append_then_drop_still_persists() {
    let store = MemoryStore::new();
    let coordinator = FlushCoordinator::builder()
        .persistence(store.clone())
        .delivery(Flaky::failing())
        .build()
        .unwrap();
    let mut events = coordinator.subscribe();
    coordinator.start();

    coordinator.info("important", &json!({ "n": 1 }));
    drop(coordinator);
    sleep(Duration::from_secs(1)).await;

    assert_eq!(numbers(&store.snapshot()), vec![1]);
    let seen = drain(&mut events);
    assert!(seen.contains(&CoordinatorEvent::Recorded { buffered: 1 }));
    assert!(!seen.iter().any(CoordinatorEvent::is_data_loss));
}

#[tokio::test(start_paused = true)]
async fn test_append_with_non_object_data_reports_failure() {
    let coordinator = FlushCoordinator::builder()
        .delivery(Recording::default())
        .build()
        .unwrap();
    let mut events = coordinator.subscribe();

    coordinator.append("not a map", &json!([1, 2, 3]));

    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], CoordinatorEvent::AppendFailed { .. }));
    assert!(events[0].is_data_loss());
    assert_eq!(coordinator.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_persist_failure_keeps_entry_in_memory() {
    let store = MemoryStore::new();
    let coordinator = FlushCoordinator::builder()
        .persistence(store.clone())
        .delivery(Flaky::failing())
        .build()
        .unwrap();
    let mut events = coordinator.subscribe();

    store.set_failing(true);
    coordinator.record(entry(1)).await.unwrap();

    assert_eq!(coordinator.count(), 1);
    assert!(store.snapshot().is_empty());
    let seen = drain(&mut events);
    assert!(matches!(seen[0], CoordinatorEvent::PersistFailed { buffered: 1, .. }));
    assert_eq!(seen[1], CoordinatorEvent::Recorded { buffered: 1 });

    // Next successful persist mirrors the whole buffer again
    store.set_failing(false);
    coordinator.record(entry(2)).await.unwrap();
    assert_eq!(numbers(&store.snapshot()), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_buffer_survives_restart() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("buffer.redb");

    {
        let coordinator = FlushCoordinator::builder()
            .persistence(DiskStore::open(&path).unwrap())
            .delivery(Flaky::failing())
            .build()
            .unwrap();
        coordinator.record(entry(1)).await.unwrap();
        coordinator.record(entry(2)).await.unwrap();

        // Let the leading sync fail before the process "exits"
        sleep(Duration::from_millis(10)).await;
        assert_eq!(coordinator.count(), 2);
    }

    let store = DiskStore::open(&path).unwrap();
    let delivery = Arc::new(Recording::default());
    let coordinator = FlushCoordinator::builder()
        .persistence(store.clone())
        .delivery(delivery.clone())
        .restore()
        .await
        .unwrap();

    assert_eq!(coordinator.count(), 2);
    assert_eq!(coordinator.flush().await.unwrap(), FlushOutcome::Delivered(2));
    assert_eq!(numbers(&delivery.delivered()), vec![1, 2]);
    assert!(store.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_config_file_drives_contention_window() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("logflush.json");
    std::fs::write(&path, r#"{ "contention_tick_ms": 10, "max_contention_attempts": 3 }"#)
        .unwrap();

    let config = CoordinatorConfig::from_file(&path).unwrap();
    let delivery = Arc::new(Gated::default());
    let coordinator = FlushCoordinator::builder()
        .config(config)
        .delivery(delivery.clone())
        .build()
        .unwrap();

    coordinator.record(entry(1)).await.unwrap();
    delivery.started.notified().await;

    let err = coordinator.record(entry(2)).await.unwrap_err();
    assert!(matches!(err, FlushError::SyncContentionExceeded { attempts: 3, .. }));

    delivery.release.notify_one();
}
