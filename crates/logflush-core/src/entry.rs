//! Log entry types.
//!
//! An entry is a flat JSON object. The coordinator never looks inside it; the
//! only fields it guarantees are `level` and `message`, written last so neither
//! caller data nor metadata can replace them.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FlushError;

/// Field holding the severity tag.
pub const LEVEL_FIELD: &str = "level";

/// Field holding the formatted message.
pub const MESSAGE_FIELD: &str = "message";

/// Severity of a log entry.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!(
                "Invalid level '{}'. Must be one of: debug, info, warn, error",
                other
            )),
        }
    }
}

/// A single buffered log record.
///
/// Serializes as the bare JSON object, so a persisted or delivered buffer is a
/// plain JSON array of objects.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogEntry(Map<String, Value>);

impl LogEntry {
    /// Build an entry stamped with the current time.
    ///
    /// `data` must serialize to a JSON object; `null` and `()` mean "no fields".
    pub fn build<T: Serialize + ?Sized>(
        level: LogLevel,
        message: &str,
        data: &T,
        metadata: Map<String, Value>,
    ) -> Result<Self, FlushError> {
        Self::build_at(Utc::now(), level, message, data, metadata)
    }

    /// Build an entry with an explicit timestamp.
    ///
    /// Field precedence, lowest to highest: caller data, metadata, then
    /// `level` and `message`.
    pub fn build_at<T: Serialize + ?Sized>(
        at: DateTime<Utc>,
        level: LogLevel,
        message: &str,
        data: &T,
        metadata: Map<String, Value>,
    ) -> Result<Self, FlushError> {
        let data = serde_json::to_value(data)
            .map_err(|e| FlushError::AppendFailure(format!("cannot serialize data: {}", e)))?;

        let mut fields = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(FlushError::AppendFailure(format!(
                    "data must be an object, got {}",
                    json_kind(&other)
                )))
            }
        };

        fields.extend(metadata);
        fields.insert(LEVEL_FIELD.to_string(), Value::String(level.as_str().to_string()));
        fields.insert(
            MESSAGE_FIELD.to_string(),
            Value::String(format_message(at, level, message)),
        );

        Ok(Self(fields))
    }

    /// Wrap an existing map without touching it.
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `level` field, if present and a string.
    pub fn level(&self) -> Option<&str> {
        self.0.get(LEVEL_FIELD).and_then(Value::as_str)
    }

    /// The formatted `message` field, if present and a string.
    pub fn message(&self) -> Option<&str> {
        self.0.get(MESSAGE_FIELD).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from a JSON line.
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// `2026-01-21T14:30:45.123Z INFO : text`
pub fn format_message(at: DateTime<Utc>, level: LogLevel, message: &str) -> String {
    format!(
        "{} {} : {}",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        level,
        message
    )
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
