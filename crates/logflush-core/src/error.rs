//! Error types for the flush coordinator and its collaborators

use std::time::Duration;

use thiserror::Error;

/// Main error type for coordinator operations
#[derive(Error, Debug)]
pub enum FlushError {
    /// A sync held the buffer for the whole contention window; the entry was dropped
    #[error("Sync still running after {attempts} attempts ({waited:?}); entry dropped")]
    SyncContentionExceeded {
        /// Number of polling attempts made
        attempts: u32,
        /// Total time spent waiting
        waited: Duration,
    },

    /// The delivery collaborator rejected or failed to ship the buffer
    #[error("Delivery failed: {0}")]
    DeliveryFailed(#[from] DeliveryError),

    /// A log entry could not be built from the caller's data
    #[error("Append failure: {0}")]
    AppendFailure(String),

    /// The persisted buffer could not be read back
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistError),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The append worker is no longer running
    #[error("Coordinator is shut down")]
    Closed,
}

/// Errors returned by a [`Delivery`](crate::delivery::Delivery) collaborator
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Transport-level failure (connect, timeout, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// Collector answered with a non-success status
    #[error("Server error: HTTP {0}")]
    Server(u16),

    /// Entries could not be encoded for the wire
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Local I/O error (spool file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Collector refused the batch for a reason of its own
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Errors returned by a [`Persistence`](crate::storage::Persistence) collaborator
#[derive(Error, Debug)]
pub enum PersistError {
    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Buffer could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Store is temporarily unable to accept writes
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias using FlushError
pub type FlushResult<T> = Result<T, FlushError>;
