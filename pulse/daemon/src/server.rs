//! HTTP Routes
//!
//! ```text
//! GET  /health                              -> "ok"
//! GET  /streams                             -> live stream summary (JSON)
//! GET  /streams/simple                      -> SSE, values 1..=10
//! GET  /streams/multi-stage                 -> SSE, stages 1-3, 4-6, 7-9
//! GET  /streams/cancelable/:stream_id       -> SSE, ticks until cancelled
//! POST /streams/cancelable/:stream_id/cancel -> {"streamId", "cancelled"}
//! ```
//!
//! Every SSE response is backed by a fresh [`ChannelEmitter`] sized from the
//! stream manager's configuration.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use pulse_core::{
    ChannelEmitter, EmitterReceiver, ManagerSummary, StreamError, StreamId, StreamManager,
};

use crate::sse::event_stream;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// The stream manager all routes go through
    pub manager: StreamManager,
}

impl AppState {
    /// Wrap a stream manager
    pub fn new(manager: StreamManager) -> Self {
        Self { manager }
    }

    fn emitter_pair(&self) -> (ChannelEmitter, EmitterReceiver) {
        let config = self.manager.config();
        ChannelEmitter::with_timeout(config.emitter_capacity, config.emitter_timeout)
    }
}

/// Build the daemon's router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/streams", get(list_streams))
        .route("/streams/simple", get(simple_stream))
        .route("/streams/multi-stage", get(multi_stage_stream))
        .route("/streams/cancelable/:stream_id", get(cancelable_stream))
        .route("/streams/cancelable/:stream_id/cancel", post(cancel_stream))
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced to HTTP clients
#[derive(Debug, Error)]
pub enum ApiError {
    /// Opening the stream failed
    #[error(transparent)]
    Stream(#[from] StreamError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Stream(StreamError::EmptyStreamId) => StatusCode::BAD_REQUEST,
            Self::Stream(StreamError::AlreadyExists(_)) => StatusCode::CONFLICT,
            Self::Stream(StreamError::MaxStreamsReached { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Stream(StreamError::OpenFailed { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> &'static str {
    "ok"
}

async fn list_streams(State(state): State<AppState>) -> Json<ManagerSummary> {
    Json(state.manager.summary())
}

async fn simple_stream(State(state): State<AppState>) -> impl IntoResponse {
    let (emitter, receiver) = state.emitter_pair();
    let stream_id = state.manager.open_simple_stream(emitter);
    info!(stream_id = %stream_id, "Simple stream requested");
    event_stream(receiver)
}

async fn multi_stage_stream(State(state): State<AppState>) -> impl IntoResponse {
    let (emitter, receiver) = state.emitter_pair();
    let stream_id = state.manager.open_multi_stage_stream(emitter);
    info!(stream_id = %stream_id, "Multi-stage stream requested");
    event_stream(receiver)
}

async fn cancelable_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (emitter, receiver) = state.emitter_pair();
    state.manager.open_cancelable_stream(stream_id, emitter)?;
    Ok(event_stream(receiver))
}

/// Body of the cancel response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    /// The stream the request named
    pub stream_id: StreamId,
    /// Whether this request tore the stream down
    pub cancelled: bool,
}

async fn cancel_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Json<CancelResponse> {
    let stream_id = StreamId::new(stream_id);
    let cancelled = state.manager.cancel_stream(&stream_id);
    info!(stream_id = %stream_id, cancelled, "Cancel requested");
    Json(CancelResponse {
        stream_id,
        cancelled,
    })
}
