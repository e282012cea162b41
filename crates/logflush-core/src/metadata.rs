//! Metadata enrichment for log entries.
//!
//! A provider is asked for a fresh map on every append; its fields are merged
//! over the caller's data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Source of enrichment fields merged into every entry.
pub trait MetadataProvider: Send + Sync {
    fn metadata(&self) -> Map<String, Value>;
}

impl<F> MetadataProvider for F
where
    F: Fn() -> Map<String, Value> + Send + Sync,
{
    fn metadata(&self) -> Map<String, Value> {
        self()
    }
}

/// Provider that adds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetadata;

impl MetadataProvider for NoMetadata {
    fn metadata(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// Provider returning the same fields every time.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadata {
    fields: Map<String, Value>,
}

impl StaticMetadata {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Add a single field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl MetadataProvider for StaticMetadata {
    fn metadata(&self) -> Map<String, Value> {
        self.fields.clone()
    }
}

/// Per-process session metadata.
///
/// The session id is generated once and shared by every entry the process
/// records, so a collector can group a run's logs together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Session ID (ULID)
    pub session_id: String,

    /// When the session started (ISO 8601)
    pub started_at: String,

    /// Instance label (e.g. service or binary name)
    pub instance: String,

    /// Host name, when the environment exposes one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// OS process id
    pub pid: u32,
}

impl SessionMetadata {
    /// Create new session metadata.
    pub fn new(instance: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            session_id: ulid::Ulid::new().to_string(),
            started_at: now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            instance: instance.into(),
            host: std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()),
            pid: std::process::id(),
        }
    }
}

impl MetadataProvider for SessionMetadata {
    fn metadata(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
