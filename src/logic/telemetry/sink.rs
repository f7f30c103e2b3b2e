//! Event Sink
//!
//! Append-only, monotonically sequenced event log plus the aggregate
//! counters the dashboard polls. Readers receive `Arc` snapshots, never a
//! view into the writer's buffers. Optional JSONL persistence mirrors every
//! event to disk; a persistence failure increments a counter and never
//! interrupts detection.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Datelike, Timelike, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::constants::MAX_EVENT_FILE_SIZE;
use crate::logic::classifier::Label;
use super::event::DetectionEvent;

// ============================================================================
// PERSISTENT WRITER
// ============================================================================

/// Append-only JSONL writer with size-based rotation
struct EventWriter {
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_size: u64,
    base_dir: PathBuf,
}

impl EventWriter {
    fn new(base_dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        let (current_file, file) = Self::open_new_file(&base_dir)?;
        Ok(Self {
            writer: BufWriter::new(file),
            current_file,
            current_size: 0,
            base_dir,
        })
    }

    fn open_new_file(base_dir: &PathBuf) -> std::io::Result<(PathBuf, File)> {
        let now = Utc::now();
        let filename = format!(
            "detection_log_{}{:02}{:02}_{:02}{:02}{:02}.jsonl",
            now.year(),
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second()
        );
        let path = base_dir.join(filename);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        log::info!("Opened detection log: {:?}", path);
        Ok((path, file))
    }

    fn write(&mut self, event: &DetectionEvent) -> std::io::Result<()> {
        let line = event.to_jsonl();
        let bytes = line.as_bytes();

        if self.current_size + bytes.len() as u64 > MAX_EVENT_FILE_SIZE {
            self.rotate()?;
        }

        self.writer.write_all(bytes)?;
        self.writer.write_all(b"\n")?;
        self.current_size += bytes.len() as u64 + 1;

        // Flush for durability
        self.writer.flush()
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        self.writer.flush()?;
        let (path, file) = Self::open_new_file(&self.base_dir)?;
        log::info!("Rotated detection log from {:?} to {:?}", self.current_file, path);
        self.writer = BufWriter::new(file);
        self.current_file = path;
        self.current_size = 0;
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Aggregate counters, queryable as a snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct SinkStats {
    pub session_id: String,
    pub total_packets: u64,
    pub total_flows: u64,
    pub total_detections: u64,
    pub events_logged: u64,
    pub persist_errors: u64,
}

// ============================================================================
// EVENT SINK
// ============================================================================

pub struct EventSink {
    events: RwLock<Vec<Arc<DetectionEvent>>>,
    /// Next sequence number; engine-lifetime monotonic, survives clear()
    next_seq: AtomicU64,
    total_packets: AtomicU64,
    total_flows: AtomicU64,
    total_detections: AtomicU64,
    persist_errors: AtomicU64,
    writer: Mutex<Option<EventWriter>>,
    session_id: String,
}

impl EventSink {
    /// In-memory sink, no persistence
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(1),
            total_packets: AtomicU64::new(0),
            total_flows: AtomicU64::new(0),
            total_detections: AtomicU64::new(0),
            persist_errors: AtomicU64::new(0),
            writer: Mutex::new(None),
            session_id: Uuid::new_v4().to_string(),
        }
    }

    /// Sink that mirrors every event to a JSONL log under `dir`
    pub fn with_persistence(dir: PathBuf) -> std::io::Result<Self> {
        let sink = Self::new();
        *sink.writer.lock() = Some(EventWriter::new(dir)?);
        Ok(sink)
    }

    /// Default persistence directory (platform data dir)
    pub fn default_log_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ddos-sentry")
            .join("detections")
    }

    // ------------------------------------------------------------------
    // COUNTERS
    // ------------------------------------------------------------------

    pub fn note_packet(&self) -> u64 {
        self.total_packets.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn note_flow(&self) {
        self.total_flows.fetch_add(1, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // APPEND / READ
    // ------------------------------------------------------------------

    /// Append an event, assigning its sequence number. Returns the sequence.
    pub fn append(&self, mut event: DetectionEvent) -> u64 {
        let arc = {
            let mut events = self.events.write();
            // Sequence assignment happens under the write lock so stored
            // events are always in sequence order.
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            event.sequence = seq;
            let arc = Arc::new(event);
            events.push(arc.clone());
            arc
        };

        if arc.label == Label::Malicious {
            self.total_detections.fetch_add(1, Ordering::Relaxed);
        }

        // Persistence failure is non-fatal: count it and keep detecting
        let mut writer = self.writer.lock();
        if let Some(writer) = writer.as_mut() {
            if let Err(e) = writer.write(&arc) {
                self.persist_errors.fetch_add(1, Ordering::Relaxed);
                log::error!("Failed to persist detection event: {}", e);
            }
        }

        arc.sequence
    }

    /// Ordered events with sequence strictly greater than `sequence`
    pub fn read_since(&self, sequence: u64) -> Vec<Arc<DetectionEvent>> {
        let events = self.events.read();
        let start = events.partition_point(|e| e.sequence <= sequence);
        events[start..].to_vec()
    }

    /// Number of events currently in the log
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    // ------------------------------------------------------------------
    // STATS / MAINTENANCE
    // ------------------------------------------------------------------

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            session_id: self.session_id.clone(),
            total_packets: self.total_packets.load(Ordering::Relaxed),
            total_flows: self.total_flows.load(Ordering::Relaxed),
            total_detections: self.total_detections.load(Ordering::Relaxed),
            events_logged: self.events.read().len() as u64,
            persist_errors: self.persist_errors.load(Ordering::Relaxed),
        }
    }

    /// Reset the in-memory log and counters. Sequence numbers keep
    /// increasing so consumers holding a cursor never see duplicates.
    pub fn clear(&self) {
        self.events.write().clear();
        self.total_packets.store(0, Ordering::Relaxed);
        self.total_flows.store(0, Ordering::Relaxed);
        self.total_detections.store(0, Ordering::Relaxed);
        self.persist_errors.store(0, Ordering::Relaxed);
        log::info!("Event log cleared");
    }

    pub fn flush(&self) {
        if let Some(writer) = self.writer.lock().as_mut() {
            if let Err(e) = writer.flush() {
                log::error!("Failed to flush detection log: {}", e);
            }
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
