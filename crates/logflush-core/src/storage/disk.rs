//! redb-backed store.
//!
//! The whole buffer lives under a single key and is rewritten in one write
//! transaction, so a crash leaves either the old or the new buffer, never a mix.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, TableDefinition};
use tracing::debug;

use super::Persistence;
use crate::entry::LogEntry;
use crate::error::PersistError;

/// Table holding the pending buffer (key: slot name, value: JSON array of entries)
const PENDING_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_entries");

const BUFFER_KEY: &str = "buffer";

/// Local durable store using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct DiskStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl DiskStore {
    /// Open (or create) the store at the given path.
    ///
    /// This will:
    /// - Create the parent directory if it doesn't exist
    /// - Initialize the database file
    /// - Create the pending entries table
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PENDING_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Persistence for DiskStore {
    async fn persist(&self, entries: &[LogEntry]) -> Result<(), PersistError> {
        let data =
            serde_json::to_vec(entries).map_err(|e| PersistError::Serialization(e.to_string()))?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_TABLE)?;
            if entries.is_empty() {
                table.remove(BUFFER_KEY)?;
            } else {
                table.insert(BUFFER_KEY, data.as_slice())?;
            }
        }
        write_txn.commit()?;

        debug!(count = entries.len(), path = %self.path.display(), "Buffer persisted");
        Ok(())
    }

    async fn load(&self) -> Result<Vec<LogEntry>, PersistError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_TABLE)?;

        match table.get(BUFFER_KEY)? {
            Some(v) => serde_json::from_slice(v.value())
                .map_err(|e| PersistError::Serialization(e.to_string())),
            None => Ok(Vec::new()),
        }
    }
}
