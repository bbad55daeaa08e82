//! Pulse Core - Cancelable Server-Push Event Streams
//!
//! This crate owns everything about a stream except the wire: opening it,
//! producing its events on a schedule, and tearing it down exactly once when
//! it is cancelled, times out, fails or completes. Transports plug in through
//! the [`Emitter`](emitter::Emitter) trait; the `pulse-daemon` crate adapts it
//! to HTTP Server-Sent Events.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Transport (SSE, tests, ...)                   │
//! │        EmitterReceiver ◄──── bounded channel ◄──── ChannelEmitter │
//! └──────────────────────────────────────────────▲───────────────────┘
//!                                                │ send / complete
//! ┌──────────────────────────────────────────────┼───────────────────┐
//! │                        PULSE CORE            │                   │
//! │  ┌───────────────┐  ┌───────────────┐  ┌─────┴─────────┐          │
//! │  │ StreamManager │──│ StreamRegistry│  │ StreamContext │          │
//! │  └───────┬───────┘  └───────────────┘  └───────────────┘          │
//! │          │                                                        │
//! │  ┌───────┴────────┐  ┌───────────────┐  ┌───────────────┐         │
//! │  │ PeriodicProducer│  │EventFormatter │  │  Serializer   │         │
//! │  └────────────────┘  └───────────────┘  └───────────────┘         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: TOML file and environment configuration
//! - [`emitter`]: Transport abstraction and the in-process channel emitter
//! - [`events`]: Stream ids, events and wire messages
//! - [`formatter`]: Tick-to-phase formatting policy
//! - [`serializer`]: Event encoding
//! - [`streaming`]: Stream manager, registry, contexts and producers
//!
//! # No HTTP Dependencies
//!
//! This crate has no dependency on any web framework. The daemon is one
//! consumer among others.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod emitter;
pub mod events;
pub mod formatter;
pub mod serializer;
pub mod streaming;

pub use config::{load_config, load_config_from_path, ConfigError, PulseConfig};
pub use emitter::{ChannelEmitter, Emitter, EmitterFrame, EmitterReceiver, TransportError};
pub use events::{SseMessage, StreamEvent, StreamId, CONTROL_SEQUENCE};
pub use formatter::{EventFormatter, Phase, PhaseTable};
pub use serializer::{EncodingError, JsonSerializer, Serializer};
pub use streaming::{
    ManagerSummary, StreamError, StreamManager, StreamManagerConfig, StreamRegistry, StreamStats,
};
