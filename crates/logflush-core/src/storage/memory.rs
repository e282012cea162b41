use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::Persistence;
use crate::entry::LogEntry;
use crate::error::PersistError;

/// In-process store.
///
/// Keeps the last persisted snapshot and counts writes. Clones share state,
/// which makes it handy for inspecting what a coordinator persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    snapshot: Mutex<Vec<LogEntry>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with entries already "on disk", as if left by a previous run.
    pub fn with_entries(entries: Vec<LogEntry>) -> Self {
        let store = Self::default();
        *store.inner.snapshot.lock() = entries;
        store
    }

    /// Last persisted buffer.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.inner.snapshot.lock().clone()
    }

    /// Number of successful `persist` calls.
    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent writes fail with [`PersistError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn persist(&self, entries: &[LogEntry]) -> Result<(), PersistError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(PersistError::Unavailable("memory store set to fail".into()));
        }
        *self.inner.snapshot.lock() = entries.to_vec();
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> Result<Vec<LogEntry>, PersistError> {
        Ok(self.snapshot())
    }
}
