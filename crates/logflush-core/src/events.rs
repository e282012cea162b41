//! Coordinator events.
//!
//! Every state change and every failure the coordinator handles off the
//! caller's path is broadcast here, so an embedding application can alert on
//! data loss without polling.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Buffer                                                         │
//! │  ├── Recorded / Cleared                                         │
//! │  └── PersistFailed (entry kept in memory)                       │
//! │                                                                 │
//! │  Sync                                                           │
//! │  ├── SyncStarted → Delivered | DeliveryFailed                   │
//! │                                                                 │
//! │  Data loss                                                      │
//! │  ├── ContentionExceeded (entry dropped)                         │
//! │  └── AppendFailed (entry never built or never recorded)         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

/// Events emitted by a [`FlushCoordinator`](crate::FlushCoordinator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// An entry was appended to the buffer
    Recorded {
        /// Buffer length after the append
        buffered: usize,
    },
    /// The persistence collaborator failed; the in-memory buffer is unchanged
    PersistFailed {
        /// Buffer length that should have been mirrored
        buffered: usize,
        /// Error description
        message: String,
    },
    /// A delivery attempt began
    SyncStarted {
        /// Number of entries being shipped
        count: usize,
    },
    /// The delivery collaborator accepted the batch and the buffer was cleared
    Delivered {
        /// Number of entries shipped
        count: usize,
    },
    /// The delivery collaborator failed; the buffer is kept for the next sync
    DeliveryFailed {
        /// Number of entries still buffered
        count: usize,
        /// Error description
        message: String,
    },
    /// A sync held the buffer too long and an entry was dropped
    ContentionExceeded {
        /// Polls made before giving up
        attempts: u32,
    },
    /// An entry could not be built or queued
    AppendFailed {
        /// Error description
        message: String,
    },
    /// The buffer was emptied
    Cleared,
}

impl CoordinatorEvent {
    /// Whether this event means an entry was lost.
    pub fn is_data_loss(&self) -> bool {
        matches!(
            self,
            CoordinatorEvent::ContentionExceeded { .. } | CoordinatorEvent::AppendFailed { .. }
        )
    }
}

impl fmt::Display for CoordinatorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorEvent::Recorded { buffered } => write!(f, "Recorded ({} buffered)", buffered),
            CoordinatorEvent::PersistFailed { message, .. } => {
                write!(f, "Persist failed: {}", message)
            }
            CoordinatorEvent::SyncStarted { count } => write!(f, "Sync started ({} entries)", count),
            CoordinatorEvent::Delivered { count } => write!(f, "Delivered {} entries", count),
            CoordinatorEvent::DeliveryFailed { count, message } => {
                write!(f, "Delivery of {} entries failed: {}", count, message)
            }
            CoordinatorEvent::ContentionExceeded { attempts } => {
                write!(f, "Entry dropped after {} contention attempts", attempts)
            }
            CoordinatorEvent::AppendFailed { message } => write!(f, "Append failed: {}", message),
            CoordinatorEvent::Cleared => write!(f, "Cleared"),
        }
    }
}
