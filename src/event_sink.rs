/*!
 * Event Sink (spec.md §4.G)
 *
 * Structured, append-only event stream for one run: session and profile
 * lifecycle, plus one record per chunk outcome. Kept separate from the
 * operational `tracing` log (`logging.rs`) — this is the machine-readable
 * audit trail spec.md §6 says a run leaves behind, not a human-facing
 * console stream.
 */

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{OrbitError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    SessionEnd,
    ProfileStart,
    ProfileComplete,
    ChunkStart,
    ChunkComplete,
    ChunkError,
}

/// One record in the audit JSONL stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: String,
    pub event_type: EventType,
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_copied: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_copied: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Event {
    fn new(event_type: EventType, profile: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type,
            profile: profile.to_string(),
            chunk_id: None,
            source: None,
            destination: None,
            exit_code: None,
            bytes_copied: None,
            files_copied: None,
            retry_attempt: None,
            message: None,
        }
    }

    pub fn with_chunk(mut self, chunk_id: u64, source: &Path, destination: &Path) -> Self {
        self.chunk_id = Some(chunk_id);
        self.source = Some(source.to_string_lossy().to_string());
        self.destination = Some(destination.to_string_lossy().to_string());
        self
    }

    pub fn with_outcome(mut self, exit_code: i32, bytes_copied: i64, files_copied: u64) -> Self {
        self.exit_code = Some(exit_code);
        self.bytes_copied = Some(bytes_copied);
        self.files_copied = Some(files_copied);
        self
    }

    pub fn with_retry_attempt(mut self, attempt: u32) -> Self {
        self.retry_attempt = Some(attempt);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Component G's contract: accept lifecycle and chunk events for a run.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event) -> Result<()>;
}

/// Appends one JSON object per line to the audit log file under a run's
/// log root (spec.md §6 on-disk layout).
pub struct FileEventSink {
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl FileEventSink {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(OrbitError::Io)?;

        Ok(Self {
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }
}

impl EventSink for FileEventSink {
    fn emit(&self, event: Event) -> Result<()> {
        let json = serde_json::to_string(&event)
            .map_err(|e| OrbitError::Other(format!("failed to serialize event: {}", e)))?;

        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{}", json).map_err(OrbitError::Io)?;
        writer.flush().map_err(OrbitError::Io)?;
        Ok(())
    }
}

/// Discards every event. Used where no audit trail is wanted (e.g. unit
/// tests exercising other components).
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: Event) -> Result<()> {
        Ok(())
    }
}

/// Collects events in memory; used by the orchestrator's own test suite to
/// assert on the event stream a run produced.
pub struct MemoryEventSink {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Default for MemoryEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: Event) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

pub fn session_start(profile: &str) -> Event {
    Event::new(EventType::SessionStart, profile)
}

pub fn session_end(profile: &str) -> Event {
    Event::new(EventType::SessionEnd, profile)
}

pub fn profile_start(profile: &str) -> Event {
    Event::new(EventType::ProfileStart, profile)
}

pub fn profile_complete(profile: &str) -> Event {
    Event::new(EventType::ProfileComplete, profile)
}

pub fn chunk_start(profile: &str, chunk_id: u64, source: &Path, destination: &Path) -> Event {
    Event::new(EventType::ChunkStart, profile).with_chunk(chunk_id, source, destination)
}

pub fn chunk_complete(
    profile: &str,
    chunk_id: u64,
    source: &Path,
    destination: &Path,
    exit_code: i32,
    bytes_copied: i64,
    files_copied: u64,
) -> Event {
    Event::new(EventType::ChunkComplete, profile)
        .with_chunk(chunk_id, source, destination)
        .with_outcome(exit_code, bytes_copied, files_copied)
}

pub fn chunk_error(profile: &str, chunk_id: u64, source: &Path, destination: &Path, message: impl Into<String>) -> Event {
    Event::new(EventType::ChunkError, profile)
        .with_chunk(chunk_id, source, destination)
        .with_message(message)
}
