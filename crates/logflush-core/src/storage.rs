//! Durable mirror of the coordinator's buffer.
//!
//! The coordinator hands the full buffer to [`Persistence::persist`] after every
//! change, so a store only ever needs to replace its previous copy. On startup
//! [`Persistence::load`] returns whatever survived the last process.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entry::LogEntry;
use crate::error::PersistError;

mod disk;
mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

/// Persistence collaborator.
///
/// Implementations must not keep a reference to `entries` past the call.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Replace the stored buffer with `entries`.
    async fn persist(&self, entries: &[LogEntry]) -> Result<(), PersistError>;

    /// Read the stored buffer back. An empty store yields an empty vec.
    async fn load(&self) -> Result<Vec<LogEntry>, PersistError>;
}

#[async_trait]
impl<T: Persistence + ?Sized> Persistence for Arc<T> {
    async fn persist(&self, entries: &[LogEntry]) -> Result<(), PersistError> {
        (**self).persist(entries).await
    }

    async fn load(&self) -> Result<Vec<LogEntry>, PersistError> {
        (**self).load().await
    }
}

/// Store that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl Persistence for NullStore {
    async fn persist(&self, _entries: &[LogEntry]) -> Result<(), PersistError> {
        Ok(())
    }

    async fn load(&self) -> Result<Vec<LogEntry>, PersistError> {
        Ok(Vec::new())
    }
}
