//! Per-Stream Context
//!
//! Everything one cancelable stream owns: its emitter, the handle of its
//! producer, and the `closed` flag that decides which teardown trigger wins.
//!
//! # Send serialization
//!
//! All sends for a stream go through `send_lock`. A tick checks `closed` while
//! holding the lock, and teardown flips `closed` before taking it, so once the
//! terminal event has been written no tick can follow it.
//!
//! # Drop
//!
//! A context dropped while still open (its manager went away) stops its
//! producer and completes its emitter, so neither the tick task nor the
//! client response outlives it.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;

use super::producer::ProducerHandle;
use crate::emitter::{Emitter, TransportError};
use crate::events::{SseMessage, StreamId};
use crate::serializer::EncodingError;

/// Why a message could not be delivered
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The payload could not be encoded
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// The transport rejected the message
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What happened to a message offered while the stream was expected open
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the emitter
    Sent,
    /// Dropped because the stream has been torn down
    Closed,
}

/// State of one live cancelable stream
pub struct StreamContext {
    stream_id: StreamId,
    emitter: Box<dyn Emitter>,
    send_lock: Mutex<()>,
    producer: Mutex<Option<ProducerHandle>>,
    closed: AtomicBool,
    created_at: Instant,
    next_event_id: AtomicU64,
    ticks_sent: AtomicU64,
    last_timestamp_ms: AtomicI64,
}

impl StreamContext {
    /// Create an open context owning `emitter`
    #[must_use]
    pub fn new(stream_id: StreamId, emitter: Box<dyn Emitter>) -> Self {
        Self {
            stream_id,
            emitter,
            send_lock: Mutex::new(()),
            producer: Mutex::new(None),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
            next_event_id: AtomicU64::new(0),
            ticks_sent: AtomicU64::new(0),
            last_timestamp_ms: AtomicI64::new(i64::MIN),
        }
    }

    /// The stream id
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// The emitter, for registering hooks
    #[must_use]
    pub fn emitter(&self) -> &dyn Emitter {
        self.emitter.as_ref()
    }

    /// Whether the stream has been torn down
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flip `closed` from false to true
    ///
    /// This is the only decision point between racing teardown triggers:
    /// exactly one caller ever gets `true`.
    pub fn try_close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Record the producer driving this stream
    ///
    /// If teardown already happened (the creation race window), the producer
    /// is stopped right away instead of being stored.
    pub fn attach_producer(&self, handle: ProducerHandle) {
        let mut slot = self.producer.lock();
        if self.is_closed() {
            handle.stop();
            return;
        }
        *slot = Some(handle);
    }

    /// Stop the producer if one is attached and still running
    ///
    /// Returns `true` if this call stopped it.
    pub fn stop_producer(&self) -> bool {
        let handle = self.producer.lock().take();
        handle.is_some_and(|h| h.stop())
    }

    /// Whether a producer is attached and has not been asked to stop
    #[must_use]
    pub fn producer_running(&self) -> bool {
        self.producer
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_stopped())
    }

    /// Allocate the next event id (`<stream id>-<n>`)
    pub fn next_event_id(&self) -> String {
        let n = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        format!("{}-{n}", self.stream_id)
    }

    /// Wall-clock time for the next event, never earlier than a previous one
    pub fn timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_millis();
        let previous = self.last_timestamp_ms.fetch_max(now, Ordering::SeqCst);
        DateTime::<Utc>::from_timestamp_millis(previous.max(now)).unwrap_or_else(Utc::now)
    }

    /// Build and send a message unless the stream is closed
    ///
    /// `build` runs under the send lock, after the closed check.
    ///
    /// # Errors
    ///
    /// Returns the encoding or transport failure; the caller decides whether
    /// it is fatal.
    pub fn send_while_open<F>(&self, build: F) -> Result<Delivery, DeliveryError>
    where
        F: FnOnce(&Self) -> Result<SseMessage, EncodingError>,
    {
        let _guard = self.send_lock.lock();
        if self.is_closed() {
            return Ok(Delivery::Closed);
        }
        let message = build(self)?;
        self.emitter.send(message)?;
        Ok(Delivery::Sent)
    }

    /// Build and send the terminal message
    ///
    /// Only the teardown winner calls this, after `try_close`.
    ///
    /// # Errors
    ///
    /// Returns the encoding or transport failure.
    pub fn send_final<F>(&self, build: F) -> Result<(), DeliveryError>
    where
        F: FnOnce(&Self) -> Result<SseMessage, EncodingError>,
    {
        let _guard = self.send_lock.lock();
        let message = build(self)?;
        self.emitter.send(message)?;
        Ok(())
    }

    /// Complete the emitter normally
    pub fn complete(&self) {
        let _guard = self.send_lock.lock();
        self.emitter.complete();
    }

    /// Complete the emitter with an error
    pub fn complete_with_error(&self, error: TransportError) {
        let _guard = self.send_lock.lock();
        self.emitter.complete_with_error(error);
    }

    /// Count a delivered tick
    pub fn record_tick(&self) {
        self.ticks_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of ticks delivered so far
    #[must_use]
    pub fn ticks_sent(&self) -> u64 {
        self.ticks_sent.load(Ordering::Relaxed)
    }

    /// When the stream was opened
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since the stream was opened
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl Drop for StreamContext {
    fn drop(&mut self) {
        if let Some(handle) = self.producer.get_mut().take() {
            handle.stop();
        }
        if !*self.closed.get_mut() {
            tracing::debug!(stream_id = %self.stream_id, "Open stream dropped, completing emitter");
            self.emitter.complete();
        }
    }
}

impl std::fmt::Debug for StreamContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamContext")
            .field("stream_id", &self.stream_id)
            .field("closed", &self.is_closed())
            .field("ticks_sent", &self.ticks_sent())
            .finish_non_exhaustive()
    }
}
