//! Cancelable Server-Push Streams
//!
//! Each cancelable stream is a [`StreamContext`] held in the shared
//! [`StreamRegistry`], fed by its own [`PeriodicProducer`] task. Simple and
//! multi-stage streams are finite runs of [`Stage`]s and never touch the
//! registry.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         StreamManager                             │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │                StreamRegistry (DashMap)                     │  │
//! │  │  ┌─────────────────┐  ┌─────────────────┐                  │  │
//! │  │  │  StreamContext  │  │  StreamContext  │  ...             │  │
//! │  │  │  (id: A)        │  │  (id: B)        │                  │  │
//! │  │  │  closed / lock  │  │  closed / lock  │                  │  │
//! │  │  └───────┬─────────┘  └───────┬─────────┘                  │  │
//! │  └──────────┼────────────────────┼────────────────────────────┘  │
//! │             │                    │                               │
//! │     PeriodicProducer     PeriodicProducer     (one task each)    │
//! │             │                    │                               │
//! │             ▼                    ▼                               │
//! │          Emitter              Emitter  ◄── hooks: completion,    │
//! │                                               timeout, error     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Teardown
//!
//! Cancel, timeout, error and completion race freely. The context's closed
//! flag picks one winner; the winner stops the producer, sends the terminal
//! event (except on completion), completes the emitter and removes the
//! context from the registry.
//!
//! # Example
//!
//! ```ignore
//! use pulse_core::emitter::ChannelEmitter;
//! use pulse_core::streaming::StreamManager;
//!
//! let manager = StreamManager::new();
//! let (emitter, receiver) = ChannelEmitter::new_pair(64);
//! manager.open("job-42", emitter)?;
//!
//! // ... later, from another request
//! manager.cancel_stream(&"job-42".into());
//! ```

mod context;
mod producer;
mod registry;
mod stream_manager;

pub use context::{Delivery, DeliveryError, StreamContext};
pub use producer::{drain_stages, PeriodicProducer, ProducerHandle, Stage, StageOutcome};
pub use registry::StreamRegistry;
pub use stream_manager::{
    ManagerSummary, StreamError, StreamManager, StreamManagerConfig, StreamStats,
};
