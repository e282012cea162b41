//! Buffered flush coordinator.
//!
//! The `FlushCoordinator` owns the in-memory buffer of log entries, mirrors it to
//! a [`Persistence`] collaborator after every change, and ships it to a
//! [`Delivery`] collaborator on a throttled schedule.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  FlushCoordinator (cheap to clone, shares one Inner)            │
//! │  ├── queue.tx ──▶ append worker ──▶ record()                    │
//! │  │   └── single consumer, keeps call order                      │
//! │  ├── buffer: tokio Mutex<Vec<LogEntry>>                         │
//! │  │   └── held across each check + mutate + persist              │
//! │  ├── syncing: AtomicBool (released by a drop guard)             │
//! │  ├── throttle ──▶ sync()  (leading edge + one trailing run)     │
//! │  ├── ticker: JoinHandle   (calls the throttle every interval)   │
//! │  └── event_tx: broadcast::Sender<CoordinatorEvent>              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sync gate
//!
//! While a delivery is in flight `record` does not touch the buffer. It sleeps
//! one contention tick at a time and gives up with
//! [`FlushError::SyncContentionExceeded`] once the configured number of
//! attempts is spent. A failed delivery leaves the buffer (and its persisted
//! copy) exactly as it was; the next throttled sync retries the whole thing.
//!
//! ## Append queue
//!
//! The queue sender is shared by the handles, not owned by `Inner`. The worker
//! keeps `Inner` alive, so once the last handle is dropped it still records and
//! persists everything queued before it exits. Entries queued while no runtime
//! was available are reported as [`CoordinatorEvent::AppendFailed`] when the
//! coordinator is dropped.
//!
//! ## Persistence failures
//!
//! A failed `persist` is logged and broadcast as
//! [`CoordinatorEvent::PersistFailed`]; the operation that triggered it still
//! completes. The in-memory buffer is authoritative and the next successful
//! persist rewrites the full buffer.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::delivery::Delivery;
use crate::entry::{LogEntry, LogLevel};
use crate::error::{FlushError, FlushResult};
use crate::events::CoordinatorEvent;
use crate::metadata::{MetadataProvider, NoMetadata};
use crate::storage::{NullStore, Persistence};
use crate::throttle::{Throttle, ThrottleCall};

/// Result of a single sync attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The buffer was shipped and cleared
    Delivered(usize),
    /// Nothing to ship
    Empty,
    /// Another sync holds the gate; this one did nothing
    AlreadySyncing,
}

/// Releases the sync gate on every exit path, including panics and
/// cancellation of the delivery future.
struct SyncGate<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SyncGate<'a> {
    fn close(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self { flag }
    }
}

impl Drop for SyncGate<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct Inner {
    config: CoordinatorConfig,
    metadata: Arc<dyn MetadataProvider>,
    persistence: Arc<dyn Persistence>,
    delivery: Arc<dyn Delivery>,

    buffer: tokio::sync::Mutex<Vec<LogEntry>>,
    /// Mirror of `buffer.len()` for lock-free reads
    buffered: AtomicUsize,
    syncing: AtomicBool,

    throttle: Throttle,
    event_tx: broadcast::Sender<CoordinatorEvent>,

    append_rx: Mutex<Option<mpsc::UnboundedReceiver<LogEntry>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn emit(&self, event: CoordinatorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Lock the buffer once no sync holds the gate.
    async fn idle_buffer(&self) -> FlushResult<MutexGuard<'_, Vec<LogEntry>>> {
        let tick = self.config.contention_tick();
        let max_attempts = self.config.max_contention_attempts;
        let mut attempts = 0u32;

        loop {
            let buffer = self.buffer.lock().await;
            if !self.syncing.load(Ordering::Acquire) {
                return Ok(buffer);
            }
            drop(buffer);

            if attempts >= max_attempts {
                return Err(FlushError::SyncContentionExceeded {
                    attempts,
                    waited: tick.saturating_mul(attempts),
                });
            }
            attempts += 1;
            debug!(attempts, "Sync in progress, waiting to record");
            tokio::time::sleep(tick).await;
        }
    }

    async fn record(&self, entry: LogEntry) -> FlushResult<()> {
        self.push(entry).await?;
        self.request_sync();
        Ok(())
    }

    /// Append and persist without asking for a sync.
    async fn push(&self, entry: LogEntry) -> FlushResult<()> {
        let mut buffer = match self.idle_buffer().await {
            Ok(buffer) => buffer,
            Err(e) => {
                if let FlushError::SyncContentionExceeded { attempts, .. } = &e {
                    error!(attempts = *attempts, error = %e, "Log entry dropped: sync never finished");
                    self.emit(CoordinatorEvent::ContentionExceeded {
                        attempts: *attempts,
                    });
                }
                return Err(e);
            }
        };

        buffer.push(entry);
        let buffered = buffer.len();
        self.buffered.store(buffered, Ordering::Release);
        self.persist(&buffer).await;
        drop(buffer);

        self.emit(CoordinatorEvent::Recorded { buffered });
        Ok(())
    }

    async fn persist(&self, entries: &[LogEntry]) {
        if let Err(e) = self.persistence.persist(entries).await {
            warn!(buffered = entries.len(), error = %e, "Failed to persist buffer, keeping it in memory");
            self.emit(CoordinatorEvent::PersistFailed {
                buffered: entries.len(),
                message: e.to_string(),
            });
        }
    }

    async fn clear_locked(&self, buffer: &mut Vec<LogEntry>) {
        buffer.clear();
        self.buffered.store(0, Ordering::Release);
        self.persist(buffer).await;
        self.emit(CoordinatorEvent::Cleared);
    }

    async fn sync(&self) -> FlushResult<FlushOutcome> {
        let (gate, snapshot) = {
            let buffer = self.buffer.lock().await;
            if self.syncing.load(Ordering::Acquire) {
                return Ok(FlushOutcome::AlreadySyncing);
            }
            if buffer.is_empty() {
                return Ok(FlushOutcome::Empty);
            }
            (SyncGate::close(&self.syncing), buffer.clone())
        };

        let count = snapshot.len();
        self.emit(CoordinatorEvent::SyncStarted { count });

        let result = self.delivery.deliver(&snapshot).await;
        drop(snapshot);

        match result {
            Ok(()) => {
                let mut buffer = self.buffer.lock().await;
                self.clear_locked(&mut buffer).await;
                drop(buffer);
                drop(gate);

                debug!(count, "Buffer delivered");
                self.emit(CoordinatorEvent::Delivered { count });
                Ok(FlushOutcome::Delivered(count))
            }
            Err(e) => {
                drop(gate);

                warn!(count, error = %e, "Delivery failed, buffer kept for next sync");
                self.emit(CoordinatorEvent::DeliveryFailed {
                    count,
                    message: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    fn request_sync(&self) {
        if self.throttle.call() == ThrottleCall::Coalesced {
            debug!("Sync already scheduled for this window");
        }
    }

    fn report_append_failure(&self, err: &FlushError) {
        error!(error = %err, "Log entry dropped");
        self.emit(CoordinatorEvent::AppendFailed {
            message: err.to_string(),
        });
    }
}

impl Inner {
    /// Spawn the append worker on the current runtime, once.
    fn ensure_worker(self: &Arc<Self>) {
        let mut slot = self.append_rx.lock();
        if slot.is_none() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if let Some(rx) = slot.take() {
            *self.worker.lock() = Some(runtime.spawn(run_append_worker(self.clone(), rx)));
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.get_mut().take() {
            handle.abort();
        }
        self.throttle.cancel();

        // Only set when no worker ever ran
        if let Some(mut rx) = self.append_rx.get_mut().take() {
            rx.close();
            let mut lost = 0usize;
            while rx.try_recv().is_ok() {
                lost += 1;
                self.emit(CoordinatorEvent::AppendFailed {
                    message: "coordinator dropped before the entry was recorded".to_string(),
                });
            }
            if lost > 0 {
                error!(lost, "Coordinator dropped with unrecorded log entries");
            }
        }
    }
}

/// Sender side of the append queue, shared by every handle.
///
/// Dropping the last handle closes the queue and lets the worker finish.
struct AppendQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<LogEntry>>>,
}

/// Builder for [`FlushCoordinator`].
pub struct FlushCoordinatorBuilder {
    config: CoordinatorConfig,
    metadata: Arc<dyn MetadataProvider>,
    persistence: Arc<dyn Persistence>,
    delivery: Option<Arc<dyn Delivery>>,
}

impl Default for FlushCoordinatorBuilder {
    fn default() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            metadata: Arc::new(NoMetadata),
            persistence: Arc::new(NullStore),
            delivery: None,
        }
    }
}

impl FlushCoordinatorBuilder {
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_sync_interval(interval);
        self
    }

    /// Fields merged into every entry built by `append`.
    pub fn metadata(mut self, metadata: impl MetadataProvider + 'static) -> Self {
        self.metadata = Arc::new(metadata);
        self
    }

    /// Durable mirror of the buffer. Defaults to [`NullStore`].
    pub fn persistence(mut self, persistence: impl Persistence + 'static) -> Self {
        self.persistence = Arc::new(persistence);
        self
    }

    /// Where synced buffers go. Required.
    pub fn delivery(mut self, delivery: impl Delivery + 'static) -> Self {
        self.delivery = Some(Arc::new(delivery));
        self
    }

    /// Build with an empty buffer.
    ///
    /// The persisted copy is overwritten by the first `record`, so use
    /// [`restore`](Self::restore) instead when the store may hold entries from
    /// a previous run.
    pub fn build(self) -> FlushResult<FlushCoordinator> {
        self.build_with(Vec::new())
    }

    /// Build with the buffer the persistence collaborator left behind.
    pub async fn restore(self) -> FlushResult<FlushCoordinator> {
        self.config.validate()?;
        let entries = self.persistence.load().await?;
        if !entries.is_empty() {
            info!(count = entries.len(), "Restored pending log entries");
        }
        self.build_with(entries)
    }

    fn build_with(self, entries: Vec<LogEntry>) -> FlushResult<FlushCoordinator> {
        self.config.validate()?;
        let delivery = self
            .delivery
            .ok_or_else(|| FlushError::InvalidConfig("a delivery collaborator is required".into()))?;

        let (event_tx, _) = broadcast::channel(self.config.event_capacity);
        let (append_tx, append_rx) = mpsc::unbounded_channel();
        let interval = self.config.sync_interval();
        let buffered = entries.len();

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let throttle = Throttle::new(interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        // Failures are logged and broadcast by sync itself
                        let _ = inner.sync().await;
                    }
                }
            });

            Inner {
                config: self.config,
                metadata: self.metadata,
                persistence: self.persistence,
                delivery,
                buffer: tokio::sync::Mutex::new(entries),
                buffered: AtomicUsize::new(buffered),
                syncing: AtomicBool::new(false),
                throttle,
                event_tx,
                append_rx: Mutex::new(Some(append_rx)),
                worker: Mutex::new(None),
                ticker: Mutex::new(None),
            }
        });

        Ok(FlushCoordinator {
            inner,
            queue: Arc::new(AppendQueue {
                tx: Mutex::new(Some(append_tx)),
            }),
        })
    }
}

/// Buffers log entries, mirrors them locally and ships them on a throttle.
///
/// # Example
///
/// ```ignore
/// let coordinator = FlushCoordinator::builder()
///     .metadata(SessionMetadata::new("checkout"))
///     .persistence(DiskStore::open("~/.logflush/buffer.redb")?)
///     .delivery(HttpDelivery::new("https://logs.example.com/v1/batch"))
///     .restore()
///     .await?;
///
/// coordinator.start();
/// coordinator.info("Order placed", &json!({ "order_id": 42 }));
///
/// // On the way out
/// coordinator.shutdown().await?;
/// ```
#[derive(Clone)]
pub struct FlushCoordinator {
    inner: Arc<Inner>,
    queue: Arc<AppendQueue>,
}

impl FlushCoordinator {
    pub fn builder() -> FlushCoordinatorBuilder {
        FlushCoordinatorBuilder::default()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Subscribe to coordinator events.
    ///
    /// Data-loss events (`ContentionExceeded`, `AppendFailed`) are the ones to
    /// alert on.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Start the background sync ticker, and the append worker if no append has yet.
    ///
    /// The first tick fires one interval after this call. Calling `start` on a
    /// running coordinator does nothing.
    pub fn start(&self) {
        self.inner.ensure_worker();

        let mut ticker = self.inner.ticker.lock();
        if ticker.is_some() {
            return;
        }

        let period = self.inner.config.sync_interval();
        let weak = Arc::downgrade(&self.inner);
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(inner) => inner.request_sync(),
                    None => break,
                }
            }
        }));

        info!(interval_ms = period.as_millis() as u64, "Flush coordinator started");
    }

    /// Cancel the ticker and any trailing throttled sync.
    ///
    /// Queued appends are still recorded; a sync already running finishes.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.ticker.lock().take() {
            handle.abort();
            info!("Flush coordinator stopped");
        }
        self.inner.throttle.cancel();
    }

    /// Whether the background ticker is running.
    pub fn is_running(&self) -> bool {
        self.inner.ticker.lock().is_some()
    }

    /// Stop, record everything still queued, then make one last delivery attempt.
    pub async fn shutdown(self) -> FlushResult<FlushOutcome> {
        self.stop();

        // Closing the queue lets the worker drain and exit
        self.queue.tx.lock().take();
        let worker = self.inner.worker.lock().take();
        let unstarted = self.inner.append_rx.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        } else if let Some(mut rx) = unstarted {
            // Never started: buffer what was queued, the final sync below ships it
            rx.close();
            while let Ok(entry) = rx.try_recv() {
                let _ = self.inner.push(entry).await;
            }
        }

        // A throttled sync spawned by the worker may take the gate first
        loop {
            drop(self.inner.idle_buffer().await?);
            match self.inner.sync().await? {
                FlushOutcome::AlreadySyncing => continue,
                outcome => {
                    info!(?outcome, "Flush coordinator shut down");
                    return Ok(outcome);
                }
            }
        }
    }

    /// Queue an `INFO` entry. Never blocks and never fails the caller.
    ///
    /// `data` must serialize to a JSON object (or `()` / `null` for none).
    /// Failures are logged and broadcast as [`CoordinatorEvent::AppendFailed`]
    /// or [`CoordinatorEvent::ContentionExceeded`].
    pub fn append<T: Serialize + ?Sized>(&self, message: &str, data: &T) {
        self.append_at(LogLevel::Info, message, data)
    }

    /// Queue an entry at the given level.
    pub fn append_at<T: Serialize + ?Sized>(&self, level: LogLevel, message: &str, data: &T) {
        let entry = match LogEntry::build(level, message, data, self.inner.metadata.metadata()) {
            Ok(entry) => entry,
            Err(e) => {
                self.inner.report_append_failure(&e);
                return;
            }
        };

        let queued = match self.queue.tx.lock().as_ref() {
            Some(tx) => tx.send(entry).is_ok(),
            None => false,
        };
        if queued {
            self.inner.ensure_worker();
        } else {
            self.inner.report_append_failure(&FlushError::Closed);
        }
    }

    pub fn debug<T: Serialize + ?Sized>(&self, message: &str, data: &T) {
        self.append_at(LogLevel::Debug, message, data)
    }

    pub fn info<T: Serialize + ?Sized>(&self, message: &str, data: &T) {
        self.append_at(LogLevel::Info, message, data)
    }

    pub fn warn<T: Serialize + ?Sized>(&self, message: &str, data: &T) {
        self.append_at(LogLevel::Warn, message, data)
    }

    pub fn error<T: Serialize + ?Sized>(&self, message: &str, data: &T) {
        self.append_at(LogLevel::Error, message, data)
    }

    /// Append an already-built entry, waiting out a running sync if needed.
    ///
    /// Fails with [`FlushError::SyncContentionExceeded`] (entry not appended)
    /// when the sync outlasts the contention window.
    pub async fn record(&self, entry: LogEntry) -> FlushResult<()> {
        self.inner.record(entry).await
    }

    /// Empty the buffer and its persisted copy.
    pub async fn clear(&self) {
        let mut buffer = self.inner.buffer.lock().await;
        self.inner.clear_locked(&mut buffer).await;
    }

    /// Number of buffered entries.
    pub fn count(&self) -> usize {
        self.inner.buffered.load(Ordering::Acquire)
    }

    /// Whether a delivery attempt is in flight.
    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    /// Copy of the buffered entries, oldest first.
    pub async fn entries(&self) -> Vec<LogEntry> {
        self.inner.buffer.lock().await.clone()
    }

    /// Sync right now, bypassing the throttle.
    pub async fn flush(&self) -> FlushResult<FlushOutcome> {
        self.inner.sync().await
    }

    /// Ask for a throttled sync, exactly as `record` does.
    pub fn request_sync(&self) -> ThrottleCall {
        self.inner.throttle.call()
    }
}

async fn run_append_worker(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<LogEntry>) {
    while let Some(entry) = rx.recv().await {
        // Contention failures are logged and broadcast by record itself
        let _ = inner.record(entry).await;
    }
    debug!("Append worker exited");
}
