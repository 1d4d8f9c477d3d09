//! Persistent event log.
//!
//! Detection and alert events are appended to a newline-delimited JSON file.
//! Every write is flushed and synced before returning, so an event that was
//! acknowledged survives a power cut.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::types::Event;

/// Errors writing the event log.
#[derive(Debug, Error)]
pub enum LogWriteError {
    /// The log file or its directory could not be opened.
    #[error("Failed to open event log {}: {source}", path.display())]
    Open {
        /// Log file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The event could not be serialised.
    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Writing, flushing, or syncing failed.
    #[error("Failed to write event log {}: {source}", path.display())]
    Write {
        /// Log file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Destination for detection and alert events.
pub trait EventSink: Send {
    /// Append one event. Must not return until the event is durable.
    ///
    /// # Errors
    ///
    /// Returns [`LogWriteError`] if the event could not be persisted.
    fn append(&mut self, event: &Event) -> Result<(), LogWriteError>;
}

/// Append-only JSON-lines log file.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    file: File,
}

impl EventLog {
    /// Open (or create) the log file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`LogWriteError::Open`] if the file cannot be opened for append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LogWriteError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LogWriteError::Open {
                path: path.clone(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LogWriteError::Open {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "Opened event log");
        Ok(Self { path, file })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for EventLog {
    fn append(&mut self, event: &Event) -> Result<(), LogWriteError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.sync_data())
            .map_err(|source| LogWriteError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

/// In-memory sink, useful for dry runs and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryEventSink {
    events: Vec<Event>,
}

impl MemoryEventSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events appended so far.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Remove and return all events.
    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}

impl EventSink for MemoryEventSink {
    fn append(&mut self, event: &Event) -> Result<(), LogWriteError> {
        self.events.push(event.clone());
        Ok(())
    }
}

/// Get the default data directory.
///
/// On Raspberry Pi: `/var/lib/pawguard/`
/// For development: the platform data directory.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/pawguard")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "pawguard").map_or_else(
            || PathBuf::from("./data"),
            |dirs| dirs.data_dir().to_path_buf(),
        )
    }
}

/// Get the default event log path inside the data directory.
#[must_use]
pub fn default_event_log_path() -> PathBuf {
    default_data_dir().join("events.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_event_log_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");

        let mut log = EventLog::open(&path).unwrap();
        log.append(&Event::BeaconDetection {
            time: Utc::now(),
            beacon_name: "Minidou".to_string(),
            rssi: -70,
        })
        .unwrap();
        log.append(&Event::Alert {
            time: Utc::now(),
            alert_filename: "hiss.wav".to_string(),
            beacon_name: Some("Minidou".to_string()),
            error: None,
        })
        .unwrap();
        drop(log);

        // Reopening appends rather than truncating.
        let mut log = EventLog::open(&path).unwrap();
        log.append(&Event::BeaconDetection {
            time: Utc::now(),
            beacon_name: "Rigatoni".to_string(),
            rssi: -81,
        })
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains(r#""event_type":"beacon_detection""#));
        assert!(lines[1].contains(r#""event_type":"alert""#));
        assert!(lines[1].contains(r#""alert_filename":"hiss.wav""#));
        for line in lines {
            let _: Event = serde_json::from_str(line).unwrap();
        }
    }

    #[test]
    fn test_open_fails_on_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = EventLog::open(dir.path()).unwrap_err();
        assert!(matches!(err, LogWriteError::Open { .. }));
    }

    #[test]
    fn test_memory_sink_drain() {
        let mut sink = MemoryEventSink::new();
        sink.append(&Event::BeaconDetection {
            time: Utc::now(),
            beacon_name: "a".to_string(),
            rssi: -1,
        })
        .unwrap();
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.drain().len(), 1);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_default_event_log_path() {
        assert!(default_event_log_path().ends_with("events.jsonl"));
    }
}
