//! Inspection sink for observed traffic.
//!
//! Every message successfully sent or received, over the relay or over a
//! data channel, is reported to an [`InspectionSink`] as an
//! [`InspectionRecord`]. The default [`MessageLog`] writes records to the
//! debug log and keeps the most recent ones for `/stats`.

// Rust guideline compliant 2026-02

use std::fmt;

use chrono::{DateTime, Utc};

use crate::constants::{HISTORY_CAPACITY, PREVIEW_LEN};
use crate::stats::RingBuffer;

/// Direction of an observed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by this side.
    Outgoing,
    /// Received from the peer or relay.
    Incoming,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Outgoing => "outgoing",
            Self::Incoming => "incoming",
        })
    }
}

/// Path a message took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Relay socket.
    Signaling,
    /// Data channel, by label.
    Channel(String),
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signaling => f.write_str("signaling"),
            Self::Channel(label) => write!(f, "channel '{label}'"),
        }
    }
}

/// One observed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionRecord {
    /// Observation time.
    pub at: DateTime<Utc>,
    /// Sent or received.
    pub direction: Direction,
    /// Relay or channel.
    pub route: Route,
    /// Size in bytes.
    pub size: usize,
    /// Truncated text, or a byte count for binary data.
    pub preview: String,
}

impl InspectionRecord {
    /// Build a record stamped now, with a preview derived from `bytes`.
    pub fn new(direction: Direction, route: Route, bytes: &[u8]) -> Self {
        Self {
            at: Utc::now(),
            direction,
            route,
            size: bytes.len(),
            preview: preview(bytes),
        }
    }
}

/// Receives inspection records and notes.
pub trait InspectionSink: Send + fmt::Debug {
    /// A message was sent or received.
    fn record(&mut self, record: InspectionRecord);

    /// A free-form observation (transfer progress, abandoned candidates).
    fn note(&mut self, note: &str);
}

/// Default sink: debug log plus a bounded history.
#[derive(Debug)]
pub struct MessageLog {
    recent: RingBuffer<InspectionRecord>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self {
            recent: RingBuffer::new(HISTORY_CAPACITY),
        }
    }
}

impl MessageLog {
    /// Most recent records, oldest first.
    pub fn recent(&self) -> &RingBuffer<InspectionRecord> {
        &self.recent
    }
}

impl InspectionSink for MessageLog {
    fn record(&mut self, record: InspectionRecord) {
        log::debug!(
            "[Inspect] {} via {} ({} bytes): {}",
            record.direction,
            record.route,
            record.size,
            record.preview
        );
        self.recent.push(record);
    }

    fn note(&mut self, note: &str) {
        log::debug!("[Inspect] {note}");
    }
}

/// Printable preview: text truncated to a fixed length, binary summarised.
pub fn preview(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => truncate_text(text, PREVIEW_LEN),
        Err(_) => format!("<binary {} bytes>", bytes.len()),
    }
}

/// Truncate to at most `max` characters, appending `...` when cut.
pub fn truncate_text(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}...")
}
