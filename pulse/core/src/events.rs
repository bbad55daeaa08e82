//! Stream Events
//!
//! The values pushed to a client: a [`StreamEvent`] is the structured payload,
//! an [`SseMessage`] is what actually crosses the transport (id, event name and
//! the encoded payload).
//!
//! # Sequence Numbers
//!
//! Periodic ticks carry their tick index (`>= 0`). Lifecycle milestones such as
//! "stream opened" or "stream cancelled" are control events and always carry
//! [`CONTROL_SEQUENCE`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sequence number reserved for control and terminal events
pub const CONTROL_SEQUENCE: i64 = -1;

/// Well-known event labels
///
/// Labels are an open set on the wire; these are the ones the stream manager
/// itself produces. Formatting policies add their own (see [`crate::formatter`]).
pub mod labels {
    /// Stream established
    pub const CONTROL: &str = "CONTROL";
    /// Periodic tick of a cancelable stream
    pub const RUNNING: &str = "RUNNING";
    /// Terminal event of a cancelled stream
    pub const CANCELLED: &str = "CANCELLED";
}

/// Well-known status strings
pub mod status {
    /// Sent with the control event on open
    pub const CONTROL: &str = "control";
    /// Sent with every tick of a cancelable stream
    pub const RUNNING: &str = "running";
    /// Manual cancellation
    pub const CANCELLED: &str = "cancelled";
    /// Transport timeout
    pub const TIMEOUT: &str = "timeout";
    /// Send failure or transport error
    pub const ERROR: &str = "error";
    /// Server shutting down
    pub const SHUTDOWN: &str = "shutdown";
}

/// SSE event names used for each stream kind
pub mod names {
    /// Events of the simple (single stage) stream
    pub const SIMPLE: &str = "simple";
    /// Events of a cancelable stream
    pub const CANCELABLE: &str = "cancelable";
    /// Events of the multi-stage stream
    pub const MULTI_STAGE: &str = "multi_stage";
}

/// Identifier of a stream
///
/// Caller supplied for cancelable streams, generated for the others.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Create a stream id from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, unique stream id
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty (empty ids are never registered)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One labeled moment of a stream
///
/// Serializes to the wire body
/// `{streamId, sequenceNumber, label, status, message, timestampMillis}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    /// The stream this event belongs to
    pub stream_id: StreamId,
    /// Tick index, or [`CONTROL_SEQUENCE`] for lifecycle events
    #[serde(rename = "sequenceNumber")]
    pub sequence: i64,
    /// Category of the moment
    pub label: String,
    /// Short state description
    pub status: String,
    /// Human-readable description
    pub message: String,
    /// When the event was produced
    #[serde(rename = "timestampMillis", with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl StreamEvent {
    /// Create a periodic tick event
    pub fn tick(
        stream_id: StreamId,
        sequence: u64,
        label: impl Into<String>,
        status: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            stream_id,
            sequence: i64::try_from(sequence).unwrap_or(i64::MAX),
            label: label.into(),
            status: status.into(),
            message: message.into(),
            timestamp,
        }
    }

    /// Create a control (lifecycle) event
    pub fn control(
        stream_id: StreamId,
        label: impl Into<String>,
        status: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            stream_id,
            sequence: CONTROL_SEQUENCE,
            label: label.into(),
            status: status.into(),
            message: message.into(),
            timestamp,
        }
    }

    /// Whether this is a control or terminal event rather than a tick
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.sequence == CONTROL_SEQUENCE
    }
}

/// A message as handed to an [`Emitter`](crate::emitter::Emitter)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// Event id (`<stream id>-<n>`, unique within the stream)
    pub id: String,
    /// Event name / type tag
    pub event: String,
    /// Encoded payload
    pub data: String,
}

impl SseMessage {
    /// Create a new message
    pub fn new(id: impl Into<String>, event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event: event.into(),
            data: data.into(),
        }
    }
}
