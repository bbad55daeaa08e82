//! Emitter Abstraction
//!
//! The stream manager never talks to a concrete transport. It only needs
//! something that accepts messages, can be completed (optionally with an
//! error), and reports completion, timeout and transport errors back through
//! hooks.
//!
//! # Hooks
//!
//! Hooks are one-shot callbacks fired by the transport side, usually from a
//! different task than the one emitting. Each registered hook fires at most
//! once; registering a second hook of the same kind replaces the first.
//!
//! # Implementations
//!
//! - [`ChannelEmitter`]: in-process bounded channel, consumed through an
//!   [`EmitterReceiver`] (used by the HTTP daemon to drive SSE bodies)

pub mod channel;

use thiserror::Error;

use crate::events::SseMessage;

pub use channel::{ChannelEmitter, EmitterFrame, EmitterReceiver};

/// Hook fired when the transport completes normally
pub type CompletionHook = Box<dyn FnOnce() + Send + 'static>;

/// Hook fired when the transport times out
pub type TimeoutHook = Box<dyn FnOnce() + Send + 'static>;

/// Hook fired when the transport fails
pub type ErrorHook = Box<dyn FnOnce(TransportError) + Send + 'static>;

/// Transport-level failures
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The client side is gone
    #[error("client disconnected")]
    Disconnected,

    /// The emitter was already completed
    #[error("emitter already completed")]
    Completed,

    /// The client is not draining messages fast enough
    #[error("send buffer full ({capacity} messages)")]
    BufferFull {
        /// Configured buffer capacity
        capacity: usize,
    },

    /// The transport timed out
    #[error("transport timed out")]
    Timeout,

    /// Any other transport failure
    #[error("transport failure: {0}")]
    Other(String),
}

/// Sink for the events of one stream
///
/// `send` must not block: it either queues the message or fails. Completing
/// an already completed emitter is a no-op. Hooks must never be invoked from
/// inside `send`, `complete` or `complete_with_error`.
pub trait Emitter: Send + Sync + 'static {
    /// Send one message
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the connection is gone, the emitter
    /// was completed, or the transport cannot accept more data.
    fn send(&self, message: SseMessage) -> Result<(), TransportError>;

    /// Finish the response normally
    fn complete(&self);

    /// Finish the response with an error
    fn complete_with_error(&self, error: TransportError);

    /// Register the normal-completion hook
    fn on_completion(&self, hook: CompletionHook);

    /// Register the timeout hook
    fn on_timeout(&self, hook: TimeoutHook);

    /// Register the transport-error hook
    fn on_error(&self, hook: ErrorHook);
}
