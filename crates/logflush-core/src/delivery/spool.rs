//! JSONL spool delivery.
//!
//! Appends every delivered entry as one JSON line to a local file, which acts as
//! a file-based collector (picked up later by a shipper, or tailed directly).

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::Delivery;
use crate::entry::LogEntry;
use crate::error::DeliveryError;

/// Delivery that appends batches to a JSONL file.
pub struct SpoolDelivery {
    /// Buffered file writer
    writer: Mutex<BufWriter<File>>,

    /// Path to the JSONL file
    path: PathBuf,
}

impl SpoolDelivery {
    /// Open the spool file in append mode, creating it and its directory if needed.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Get the path to the JSONL file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Delivery for SpoolDelivery {
    async fn deliver(&self, entries: &[LogEntry]) -> Result<(), DeliveryError> {
        let mut lines = String::new();
        for entry in entries {
            let json = entry
                .to_json_line()
                .map_err(|e| DeliveryError::Serialization(e.to_string()))?;
            lines.push_str(&json);
            lines.push('\n');
        }

        // Single write per batch
        let mut writer = self.writer.lock();
        writer.write_all(lines.as_bytes())?;
        writer.flush()?;

        Ok(())
    }
}

impl Drop for SpoolDelivery {
    fn drop(&mut self) {
        let _ = self.writer.lock().flush();
    }
}

/// Read every entry from a spool file, in file order.
///
/// Lines that fail to parse are skipped.
pub fn read_spool(path: impl AsRef<Path>) -> std::io::Result<Vec<LogEntry>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match LogEntry::from_json_line(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unparseable spool line");
            }
        }
    }

    Ok(entries)
}
