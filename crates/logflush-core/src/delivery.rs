//! Shipping the buffer to a collector.
//!
//! A delivery receives the full buffer as it was when the sync began. Returning
//! `Ok` means the collector has the entries and the coordinator may clear them;
//! any `Err` keeps the buffer for the next attempt, so a collector may see the
//! same entry more than once.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entry::LogEntry;
use crate::error::DeliveryError;

mod http;
mod spool;

pub use http::HttpDelivery;
pub use spool::{read_spool, SpoolDelivery};

/// Delivery collaborator.
///
/// Implementations must not keep a reference to `entries` past the call.
/// Timeouts belong here, not in the coordinator.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, entries: &[LogEntry]) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<T: Delivery + ?Sized> Delivery for Arc<T> {
    async fn deliver(&self, entries: &[LogEntry]) -> Result<(), DeliveryError> {
        (**self).deliver(entries).await
    }
}
