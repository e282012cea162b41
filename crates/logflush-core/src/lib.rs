//! Logflush Core Library
//!
//! Buffered log shipping with a durable local mirror and throttled delivery.
//!
//! ## Overview
//!
//! Application code appends structured log entries without ever waiting on the
//! network. Entries collect in an in-memory buffer that is mirrored to local
//! storage after every change, and the whole buffer is shipped to a collector
//! at most once per sync interval. A failed delivery keeps everything for the
//! next attempt; a successful one clears the buffer.
//!
//! ## Core Principles
//!
//! - **Never block the caller**: `append` queues and returns immediately
//! - **Never reorder**: entries reach the collector in append order
//! - **Survive restarts**: the buffer is restored from the local store
//!
//! ## Quick Start
//!
//! ```ignore
//! use logflush_core::{DiskStore, FlushCoordinator, HttpDelivery, SessionMetadata};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = FlushCoordinator::builder()
//!         .metadata(SessionMetadata::new("checkout"))
//!         .persistence(DiskStore::open("/var/lib/checkout/logs.redb")?)
//!         .delivery(HttpDelivery::new("https://logs.example.com/v1/batch"))
//!         .restore()
//!         .await?;
//!     coordinator.start();
//!
//!     coordinator.info("Order placed", &json!({ "order_id": 42 }));
//!     coordinator.warn("Payment slow", &json!({ "elapsed_ms": 1800 }));
//!
//!     coordinator.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod entry;
pub mod error;
pub mod events;
pub mod layer;
pub mod metadata;
pub mod storage;
pub mod throttle;

// Re-exports
pub use config::CoordinatorConfig;
pub use coordinator::{FlushCoordinator, FlushCoordinatorBuilder, FlushOutcome};
pub use delivery::{read_spool, Delivery, HttpDelivery, SpoolDelivery};
pub use entry::{LogEntry, LogLevel};
pub use error::{DeliveryError, FlushError, FlushResult, PersistError};
pub use events::CoordinatorEvent;
pub use layer::FlushLayer;
pub use metadata::{MetadataProvider, NoMetadata, SessionMetadata, StaticMetadata};
pub use storage::{DiskStore, MemoryStore, NullStore, Persistence};
pub use throttle::{Throttle, ThrottleCall};
