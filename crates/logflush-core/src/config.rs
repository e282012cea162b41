//! Coordinator configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FlushError;

/// Default throttle window / ticker period (5 seconds)
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 5_000;

/// Default sleep between contention polls (1 second)
pub const DEFAULT_CONTENTION_TICK_MS: u64 = 1_000;

/// Default number of contention polls before an entry is dropped
pub const DEFAULT_MAX_CONTENTION_ATTEMPTS: u32 = 10;

/// Default capacity for the event broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Upper bound for any configured duration (one day)
pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1_000;

/// Timing and sizing knobs for a [`FlushCoordinator`](crate::FlushCoordinator).
///
/// ```json
/// {
///   "sync_interval_ms": 5000,
///   "contention_tick_ms": 1000,
///   "max_contention_attempts": 10
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Minimum spacing between syncs, and the background ticker period
    pub sync_interval_ms: u64,
    /// How long `record` sleeps between checks while a sync is running
    pub contention_tick_ms: u64,
    /// How many checks `record` makes before giving up on an entry
    pub max_contention_attempts: u32,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            contention_tick_ms: DEFAULT_CONTENTION_TICK_MS,
            max_contention_attempts: DEFAULT_MAX_CONTENTION_ATTEMPTS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl CoordinatorConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlushError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlushError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            FlushError::InvalidConfig(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_ms = saturating_millis(interval);
        self
    }

    pub fn with_contention(mut self, tick: Duration, max_attempts: u32) -> Self {
        self.contention_tick_ms = saturating_millis(tick);
        self.max_contention_attempts = max_attempts;
        self
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn contention_tick(&self) -> Duration {
        Duration::from_millis(self.contention_tick_ms)
    }

    /// Reject values the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), FlushError> {
        if self.sync_interval_ms == 0 {
            return Err(FlushError::InvalidConfig(
                "sync_interval_ms must be positive".to_string(),
            ));
        }
        if self.contention_tick_ms == 0 {
            return Err(FlushError::InvalidConfig(
                "contention_tick_ms must be positive".to_string(),
            ));
        }
        if self.sync_interval_ms > MAX_DURATION_MS || self.contention_tick_ms > MAX_DURATION_MS {
            return Err(FlushError::InvalidConfig(format!(
                "sync_interval_ms and contention_tick_ms must not exceed {}",
                MAX_DURATION_MS
            )));
        }
        if self.event_capacity == 0 {
            return Err(FlushError::InvalidConfig(
                "event_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
