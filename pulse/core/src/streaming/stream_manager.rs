//! Stream Manager Implementation
//!
//! Opens streams, drives their ticks, and tears them down exactly once no
//! matter which trigger fires first.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use super::context::{Delivery, DeliveryError, StreamContext};
use super::producer::{drain_stages, PeriodicProducer, Stage, StageOutcome};
use super::registry::StreamRegistry;
use crate::emitter::{Emitter, TransportError};
use crate::events::{labels, names, status, SseMessage, StreamEvent, StreamId};
use crate::formatter::{EventFormatter, PhaseTable};
use crate::serializer::{EncodingError, JsonSerializer, Serializer};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the stream manager
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamManagerConfig {
    /// Interval between ticks of a cancelable stream
    pub tick_interval: Duration,
    /// Delay before each value of the simple stream
    pub simple_delay: Duration,
    /// Delay before each value of every multi-stage stage
    pub stage_delay: Duration,
    /// Maximum number of live cancelable streams
    pub max_concurrent_streams: usize,
    /// Messages an emitter may buffer before sends fail
    pub emitter_capacity: usize,
    /// How long a response may stay open before the timeout hook fires
    pub emitter_timeout: Option<Duration>,
}

impl Default for StreamManagerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            simple_delay: Duration::from_millis(500),
            stage_delay: Duration::from_millis(300),
            max_concurrent_streams: 1024,
            emitter_capacity: 64,
            emitter_timeout: None,
        }
    }
}

impl StreamManagerConfig {
    /// The single stage of the simple stream (`1..=10`)
    #[must_use]
    pub fn simple_stages(&self) -> Vec<Stage> {
        vec![Stage::new(1, 10, self.simple_delay)]
    }

    /// The stages of the multi-stage stream (`1..=3`, `4..=6`, `7..=9`)
    #[must_use]
    pub fn multi_stages(&self) -> Vec<Stage> {
        vec![
            Stage::new(1, 3, self.stage_delay),
            Stage::new(4, 3, self.stage_delay),
            Stage::new(7, 3, self.stage_delay),
        ]
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error when opening a stream
#[derive(Debug, Error)]
pub enum StreamError {
    /// The caller supplied an empty stream id
    #[error("stream id must not be empty")]
    EmptyStreamId,

    /// The stream id is already live
    #[error("stream {0} already exists")]
    AlreadyExists(StreamId),

    /// Maximum concurrent streams reached
    #[error("maximum concurrent streams reached ({max})")]
    MaxStreamsReached {
        /// Configured limit
        max: usize,
    },

    /// The control event could not be delivered
    #[error("failed to open stream {stream_id}: {source}")]
    OpenFailed {
        /// The stream that failed to open
        stream_id: StreamId,
        /// Why the control event failed
        #[source]
        source: DeliveryError,
    },
}

// ============================================================================
// Statistics
// ============================================================================

/// Statistics for one live stream
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    /// The stream
    pub stream_id: StreamId,
    /// Ticks delivered so far
    pub ticks_sent: u64,
    /// Seconds since the stream was opened
    pub uptime_secs: u64,
    /// Whether the producer is still running
    pub producer_running: bool,
}

/// Summary of the manager's state
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerSummary {
    /// Live cancelable streams
    pub active_streams: Vec<StreamStats>,
    /// Cancelable streams opened over the manager's lifetime
    pub total_streams_created: u64,
    /// Teardowns performed over the manager's lifetime
    pub total_teardowns: u64,
}

// ============================================================================
// Stream Manager
// ============================================================================

struct ManagerInner {
    registry: StreamRegistry,
    config: StreamManagerConfig,
    producer: PeriodicProducer,
    formatter: Arc<dyn EventFormatter>,
    serializer: Arc<dyn Serializer>,
    total_streams_created: AtomicU64,
    total_teardowns: AtomicU64,
}

/// Opens, drives and tears down server-push streams
///
/// Cheap to clone; clones share the registry and counters.
///
/// # Teardown
///
/// A cancelable stream ends through one of four triggers: an explicit
/// [`cancel`](Self::cancel), the emitter's timeout hook, its error hook (or a
/// failed tick send), and its completion hook. All of them funnel into the
/// context's closed flag; the first to flip it performs the teardown and the
/// rest are no-ops.
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<ManagerInner>,
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamManager {
    /// Create a stream manager with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StreamManagerConfig::default())
    }

    /// Create a stream manager with custom configuration
    #[must_use]
    pub fn with_config(config: StreamManagerConfig) -> Self {
        Self::with_registry(config, StreamRegistry::new())
    }

    /// Create a stream manager over an existing registry
    #[must_use]
    pub fn with_registry(config: StreamManagerConfig, registry: StreamRegistry) -> Self {
        Self::with_parts(
            config,
            registry,
            Arc::new(PhaseTable::default()),
            Arc::new(JsonSerializer),
        )
    }

    /// Create a stream manager with every collaborator supplied
    #[must_use]
    pub fn with_parts(
        config: StreamManagerConfig,
        registry: StreamRegistry,
        formatter: Arc<dyn EventFormatter>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                producer: PeriodicProducer::new(config.tick_interval),
                registry,
                config,
                formatter,
                serializer,
                total_streams_created: AtomicU64::new(0),
                total_teardowns: AtomicU64::new(0),
            }),
        }
    }

    /// Get the current configuration
    #[must_use]
    pub fn config(&self) -> &StreamManagerConfig {
        &self.inner.config
    }

    /// Get the registry of live streams
    #[must_use]
    pub fn registry(&self) -> &StreamRegistry {
        &self.inner.registry
    }

    // ------------------------------------------------------------------------
    // Cancelable streams
    // ------------------------------------------------------------------------

    /// Open a cancelable stream
    ///
    /// Registers the stream, sends the `CONTROL` event synchronously, wires
    /// the emitter hooks and starts the periodic producer. Ticks then run in
    /// the background until the stream is torn down.
    ///
    /// # Errors
    ///
    /// - [`StreamError::EmptyStreamId`] for a blank id
    /// - [`StreamError::AlreadyExists`] when the id is live
    /// - [`StreamError::MaxStreamsReached`] when the registry is full
    /// - [`StreamError::OpenFailed`] when the control event cannot be
    ///   delivered; nothing stays registered and the emitter is completed
    ///   with the error
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn open(&self, stream_id: impl Into<StreamId>, emitter: impl Emitter) -> Result<(), StreamError> {
        let stream_id = stream_id.into();
        if stream_id.is_empty() {
            return Err(StreamError::EmptyStreamId);
        }

        let context = Arc::new(StreamContext::new(stream_id.clone(), Box::new(emitter)));
        self.inner
            .registry
            .try_insert(Arc::clone(&context), self.inner.config.max_concurrent_streams)?;
        self.inner.total_streams_created.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            stream_id = %stream_id,
            active_streams = self.inner.registry.len(),
            "Stream registered"
        );

        self.register_hooks(&context);

        let control = context.send_while_open(|ctx| {
            let event = StreamEvent::control(
                stream_id.clone(),
                labels::CONTROL,
                status::CONTROL,
                format!("Stream established, streamId={stream_id}"),
                ctx.timestamp(),
            );
            self.inner.encode(ctx, &event)
        });

        match control {
            Ok(Delivery::Sent) => {}
            Ok(Delivery::Closed) => {
                // A hook or an explicit cancel won before the control event went out.
                tracing::debug!(stream_id = %stream_id, "Stream closed during open");
                return Ok(());
            }
            Err(source) => {
                tracing::error!(stream_id = %stream_id, error = %source, "Failed to send control event");
                self.inner.abort_open(&context, &source);
                return Err(StreamError::OpenFailed { stream_id, source });
            }
        }

        let handle = self.inner.producer.start(self.tick_callback(&context));
        context.attach_producer(handle);

        Ok(())
    }

    /// Open a cancelable stream (alias of [`open`](Self::open))
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_cancelable_stream(
        &self,
        stream_id: impl Into<StreamId>,
        emitter: impl Emitter,
    ) -> Result<(), StreamError> {
        self.open(stream_id, emitter)
    }

    /// Tear down a stream, sending a terminal `CANCELLED` event
    ///
    /// Returns `true` iff this call performed the teardown; `false` when the
    /// stream is unknown or another trigger got there first.
    pub fn cancel(&self, stream_id: &StreamId, status: &str, message: &str) -> bool {
        match self.inner.registry.get(stream_id) {
            Some(context) => self.inner.cancel_context(&context, status, message, None),
            None => {
                tracing::debug!(stream_id = %stream_id, "Cancel requested for unknown stream");
                false
            }
        }
    }

    /// Cancel a stream on behalf of the client
    pub fn cancel_stream(&self, stream_id: &StreamId) -> bool {
        self.cancel(stream_id, status::CANCELLED, "Cancelled by client")
    }

    /// Tear down a stream whose transport completed normally
    ///
    /// Sends nothing and does not complete the emitter again.
    pub fn cleanup(&self, stream_id: &StreamId, reason: &str) -> bool {
        self.inner
            .registry
            .get(stream_id)
            .is_some_and(|context| self.inner.cleanup_context(&context, reason))
    }

    /// Cancel every live stream, returning how many this call tore down
    pub fn cancel_all(&self, status: &str, message: &str) -> usize {
        self.inner
            .registry
            .contexts()
            .iter()
            .filter(|context| self.inner.cancel_context(context, status, message, None))
            .count()
    }

    fn register_hooks(&self, context: &Arc<StreamContext>) {
        let manager = Arc::downgrade(&self.inner);
        let target = Arc::downgrade(context);
        let emitter = context.emitter();

        emitter.on_completion(Box::new({
            let (manager, target) = (manager.clone(), target.clone());
            move || {
                if let Some((manager, context)) = upgrade(&manager, &target) {
                    manager.cleanup_context(&context, "complete");
                }
            }
        }));

        emitter.on_timeout(Box::new({
            let (manager, target) = (manager.clone(), target.clone());
            move || {
                if let Some((manager, context)) = upgrade(&manager, &target) {
                    manager.cancel_context(&context, status::TIMEOUT, "Connection timed out", None);
                }
            }
        }));

        emitter.on_error(Box::new(move |error| {
            if let Some((manager, context)) = upgrade(&manager, &target) {
                let message = format!("Transport error: {error}");
                manager.cancel_context(&context, status::ERROR, &message, Some(error));
            }
        }));
    }

    fn tick_callback(&self, context: &Arc<StreamContext>) -> impl FnMut(u64) + Send + 'static {
        let manager = Arc::downgrade(&self.inner);
        let target = Arc::downgrade(context);

        move |sequence| {
            let Some((manager, context)) = upgrade(&manager, &target) else {
                return;
            };
            let stream_id = context.stream_id().clone();

            let delivery = context.send_while_open(|ctx| {
                let event = StreamEvent::tick(
                    stream_id.clone(),
                    sequence,
                    labels::RUNNING,
                    status::RUNNING,
                    format!("Background tick #{sequence}"),
                    ctx.timestamp(),
                );
                manager.encode(ctx, &event)
            });

            match delivery {
                Ok(Delivery::Sent) => {
                    context.record_tick();
                    tracing::debug!(stream_id = %stream_id, sequence, "Tick sent");
                }
                Ok(Delivery::Closed) => {}
                Err(DeliveryError::Encoding(e)) => {
                    tracing::warn!(stream_id = %stream_id, sequence, error = %e, "Skipping tick that failed to encode");
                }
                Err(DeliveryError::Transport(e)) => {
                    tracing::error!(stream_id = %stream_id, sequence, error = %e, "Tick send failed");
                    manager.cancel_context(&context, status::ERROR, "Send failed, stream terminated", Some(e));
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Simple and multi-stage streams
    // ------------------------------------------------------------------------

    /// Stream `1..=10` through the phase formatter, then complete
    ///
    /// The stream is not registered and cannot be cancelled. Returns the id
    /// stamped on its events.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn open_simple_stream(&self, emitter: impl Emitter) -> StreamId {
        self.spawn_staged(emitter, self.inner.config.simple_stages(), names::SIMPLE)
    }

    /// Stream the stages `1..=3`, `4..=6`, `7..=9` back to back, then complete
    ///
    /// The stream is not registered and cannot be cancelled. Returns the id
    /// stamped on its events.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn open_multi_stage_stream(&self, emitter: impl Emitter) -> StreamId {
        self.spawn_staged(emitter, self.inner.config.multi_stages(), names::MULTI_STAGE)
    }

    fn spawn_staged(&self, emitter: impl Emitter, stages: Vec<Stage>, event_name: &'static str) -> StreamId {
        let stream_id = StreamId::generate();
        let inner = Arc::clone(&self.inner);
        let id = stream_id.clone();

        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let mut next_event_id: u64 = 0;
            let mut failure = None;

            let outcome = drain_stages(&stages, |value| {
                let phase = inner.formatter.describe(value);
                let event = StreamEvent {
                    stream_id: id.clone(),
                    sequence: value,
                    label: phase.label,
                    status: phase.status,
                    message: phase.message,
                    timestamp: Utc::now(),
                };

                let data = match inner.serializer.encode(&event) {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::warn!(stream_id = %id, value, error = %e, "Skipping value that failed to encode");
                        return ControlFlow::Continue(());
                    }
                };

                let message = SseMessage::new(format!("{id}-{next_event_id}"), event_name, data);
                next_event_id += 1;

                match emitter.send(message) {
                    Ok(()) => {
                        tracing::debug!(stream_id = %id, value, "Value sent");
                        ControlFlow::Continue(())
                    }
                    Err(e) => {
                        failure = Some(e);
                        ControlFlow::Break(())
                    }
                }
            })
            .await;

            match (outcome, failure) {
                (StageOutcome::Stopped { emitted }, Some(error)) => {
                    tracing::error!(stream_id = %id, emitted, error = %error, "Send failed, completing with error");
                    emitter.complete_with_error(error);
                }
                (outcome, _) => {
                    tracing::info!(
                        stream_id = %id,
                        ?outcome,
                        elapsed = ?started.elapsed(),
                        "Stream finished"
                    );
                    emitter.complete();
                }
            }
        });

        stream_id
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Get the number of live cancelable streams
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Check if a stream is live
    #[must_use]
    pub fn has_stream(&self, stream_id: &StreamId) -> bool {
        self.inner.registry.contains(stream_id)
    }

    /// Get IDs of all live streams
    #[must_use]
    pub fn active_stream_ids(&self) -> Vec<StreamId> {
        self.inner.registry.stream_ids()
    }

    /// Get statistics for a live stream
    #[must_use]
    pub fn stream_stats(&self, stream_id: &StreamId) -> Option<StreamStats> {
        self.inner.registry.get(stream_id).map(|context| stats(&context))
    }

    /// Get total number of cancelable streams opened (lifetime)
    #[must_use]
    pub fn total_streams_created(&self) -> u64 {
        self.inner.total_streams_created.load(Ordering::Relaxed)
    }

    /// Get total number of teardowns performed (lifetime)
    #[must_use]
    pub fn total_teardowns(&self) -> u64 {
        self.inner.total_teardowns.load(Ordering::Relaxed)
    }

    /// Summarize live streams and lifetime counters
    #[must_use]
    pub fn summary(&self) -> ManagerSummary {
        let mut active_streams: Vec<StreamStats> =
            self.inner.registry.contexts().iter().map(|c| stats(c)).collect();
        active_streams.sort_by(|a, b| a.stream_id.as_str().cmp(b.stream_id.as_str()));

        ManagerSummary {
            active_streams,
            total_streams_created: self.total_streams_created(),
            total_teardowns: self.total_teardowns(),
        }
    }

    /// Check if any streams are live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }
}

impl ManagerInner {
    fn encode(&self, context: &StreamContext, event: &StreamEvent) -> Result<SseMessage, EncodingError> {
        let data = self.serializer.encode(event)?;
        Ok(SseMessage::new(context.next_event_id(), names::CANCELABLE, data))
    }

    /// Tear down `context` with a terminal event
    ///
    /// `failure` is the transport error that killed the stream, if any; the
    /// emitter is then completed with that error instead of normally.
    fn cancel_context(
        &self,
        context: &Arc<StreamContext>,
        status: &str,
        message: &str,
        failure: Option<TransportError>,
    ) -> bool {
        if !context.try_close() {
            return false;
        }
        let stream_id = context.stream_id();
        context.stop_producer();

        let terminal = context.send_final(|ctx| {
            let event = StreamEvent::control(
                stream_id.clone(),
                labels::CANCELLED,
                status,
                message,
                ctx.timestamp(),
            );
            self.encode(ctx, &event)
        });
        if let Err(e) = terminal {
            tracing::warn!(stream_id = %stream_id, error = %e, "Failed to send terminal event");
        }

        match failure {
            Some(error) => context.complete_with_error(error),
            None => context.complete(),
        }
        self.registry.remove(context);
        self.total_teardowns.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            stream_id = %stream_id,
            status,
            ticks_sent = context.ticks_sent(),
            "Stream cancelled"
        );
        true
    }

    fn cleanup_context(&self, context: &Arc<StreamContext>, reason: &str) -> bool {
        if !context.try_close() {
            return false;
        }
        context.stop_producer();
        self.registry.remove(context);
        self.total_teardowns.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            stream_id = %context.stream_id(),
            reason,
            ticks_sent = context.ticks_sent(),
            "Stream cleaned up"
        );
        true
    }

    fn abort_open(&self, context: &Arc<StreamContext>, source: &DeliveryError) {
        if !context.try_close() {
            return;
        }
        let error = match source {
            DeliveryError::Transport(e) => e.clone(),
            DeliveryError::Encoding(e) => TransportError::Other(e.to_string()),
        };
        context.complete_with_error(error);
        self.registry.remove(context);
        self.total_teardowns.fetch_add(1, Ordering::Relaxed);
    }
}

fn upgrade(
    manager: &Weak<ManagerInner>,
    context: &Weak<StreamContext>,
) -> Option<(Arc<ManagerInner>, Arc<StreamContext>)> {
    Some((manager.upgrade()?, context.upgrade()?))
}

fn stats(context: &StreamContext) -> StreamStats {
    StreamStats {
        stream_id: context.stream_id().clone(),
        ticks_sent: context.ticks_sent(),
        uptime_secs: context.uptime().as_secs(),
        producer_running: context.producer_running(),
    }
}

// ============================================================================
// Tests
// ============================================================================
