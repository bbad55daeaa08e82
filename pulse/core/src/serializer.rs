//! Payload Serialization
//!
//! Converts a [`StreamEvent`] into the string carried in an SSE `data` field.
//! An encoding failure is never stream-fatal for ticks: the manager logs it and
//! skips that one event.

use thiserror::Error;

use crate::events::StreamEvent;

/// Failure to encode a payload
#[derive(Debug, Error)]
#[error("failed to encode event #{sequence} of stream {stream_id}: {source}")]
pub struct EncodingError {
    /// Stream the event belonged to
    pub stream_id: String,
    /// Sequence number of the event
    pub sequence: i64,
    /// Underlying encoder error
    #[source]
    pub source: serde_json::Error,
}

/// Converts events to wire strings
pub trait Serializer: Send + Sync {
    /// Encode an event
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError`] when the payload cannot be represented.
    fn encode(&self, event: &StreamEvent) -> Result<String, EncodingError>;
}

/// Compact JSON encoding via `serde_json`
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode(&self, event: &StreamEvent) -> Result<String, EncodingError> {
        serde_json::to_string(event).map_err(|source| EncodingError {
            stream_id: event.stream_id.to_string(),
            sequence: event.sequence,
            source,
        })
    }
}
