//! In-Process Channel Emitter
//!
//! A bounded `tokio::sync::mpsc` channel split into an emitting half
//! ([`ChannelEmitter`], handed to the stream manager) and a consuming half
//! ([`EmitterReceiver`], owned by whatever writes the HTTP response).
//!
//! # Lifecycle signals
//!
//! The receiver is the "transport" and fires the emitter hooks:
//!
//! - draining the channel after `complete()` fires **completion**
//! - after `complete_with_error()` the error frame is read last, even when
//!   the buffer was full at the time, and then completion fires
//! - the optional deadline elapsing fires **timeout**
//! - dropping the receiver before completion (client went away) fires
//!   **error** with [`TransportError::Disconnected`], then **completion**
//!
//! # Usage
//!
//! ```ignore
//! let (emitter, mut receiver) = ChannelEmitter::new_pair(64);
//! manager.open_cancelable_stream("s1".into(), emitter)?;
//!
//! while let Some(frame) = receiver.recv().await {
//!     // write frame to the response body
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

use super::{CompletionHook, Emitter, ErrorHook, TimeoutHook, TransportError};
use crate::events::SseMessage;

/// One item read from the channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmitterFrame {
    /// A message to write to the client
    Message(SseMessage),
    /// The emitter was completed with an error; nothing follows
    Error(TransportError),
}

#[derive(Default)]
struct Hooks {
    completion: Option<CompletionHook>,
    timeout: Option<TimeoutHook>,
    error: Option<ErrorHook>,
}

struct Shared {
    tx: Mutex<Option<mpsc::Sender<EmitterFrame>>>,
    capacity: usize,
    completed: AtomicBool,
    pending_error: Mutex<Option<TransportError>>,
    hooks: Mutex<Hooks>,
}

impl Shared {
    /// Drop the sender so the receiver drains and then sees the end
    ///
    /// `error` is parked until the queue is drained, so it survives a full
    /// buffer. Only the first close records anything.
    fn close(&self, error: Option<TransportError>) -> bool {
        let mut tx = self.tx.lock();
        let Some(sender) = tx.take() else {
            return false;
        };
        if let Some(error) = error {
            *self.pending_error.lock() = Some(error);
        }
        self.completed.store(true, Ordering::SeqCst);
        drop(sender);
        true
    }

    fn fire_completion(&self) {
        let hook = self.hooks.lock().completion.take();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn fire_timeout(&self) -> bool {
        let hook = self.hooks.lock().timeout.take();
        match hook {
            Some(hook) => {
                hook();
                true
            }
            None => false,
        }
    }

    fn fire_error(&self, error: TransportError) {
        let hook = self.hooks.lock().error.take();
        if let Some(hook) = hook {
            hook(error);
        }
    }
}

/// Emitting half of an in-process channel
pub struct ChannelEmitter {
    shared: Arc<Shared>,
}

impl ChannelEmitter {
    /// Create an emitter/receiver pair with the given buffer capacity and no timeout
    #[must_use]
    pub fn new_pair(capacity: usize) -> (Self, EmitterReceiver) {
        Self::with_timeout(capacity, None)
    }

    /// Create an emitter/receiver pair whose receiver fires the timeout hook
    /// once `timeout` has elapsed without the stream completing
    #[must_use]
    pub fn with_timeout(capacity: usize, timeout: Option<Duration>) -> (Self, EmitterReceiver) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(Shared {
            tx: Mutex::new(Some(tx)),
            capacity,
            completed: AtomicBool::new(false),
            pending_error: Mutex::new(None),
            hooks: Mutex::new(Hooks::default()),
        });

        let receiver = EmitterReceiver {
            rx,
            shared: Arc::clone(&shared),
            deadline: timeout.map(|t| Instant::now() + t),
            finished: false,
        };

        (Self { shared }, receiver)
    }

    /// Whether `complete` or `complete_with_error` has been called
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.shared.completed.load(Ordering::SeqCst)
    }
}

impl Emitter for ChannelEmitter {
    fn send(&self, message: SseMessage) -> Result<(), TransportError> {
        let guard = self.shared.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(TransportError::Completed);
        };

        tx.try_send(EmitterFrame::Message(message))
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::BufferFull {
                    capacity: self.shared.capacity,
                },
                TrySendError::Closed(_) => TransportError::Disconnected,
            })
    }

    fn complete(&self) {
        self.shared.close(None);
    }

    fn complete_with_error(&self, error: TransportError) {
        if !self.shared.close(Some(error)) {
            tracing::debug!("Emitter already completed, error not recorded");
        }
    }

    fn on_completion(&self, hook: CompletionHook) {
        self.shared.hooks.lock().completion = Some(hook);
    }

    fn on_timeout(&self, hook: TimeoutHook) {
        self.shared.hooks.lock().timeout = Some(hook);
    }

    fn on_error(&self, hook: ErrorHook) {
        self.shared.hooks.lock().error = Some(hook);
    }
}

impl Drop for ChannelEmitter {
    fn drop(&mut self) {
        // Nobody can send any more: let the receiver reach the end.
        self.shared.close(None);
    }
}

/// Consuming half of an in-process channel
pub struct EmitterReceiver {
    rx: mpsc::Receiver<EmitterFrame>,
    shared: Arc<Shared>,
    deadline: Option<Instant>,
    finished: bool,
}

impl EmitterReceiver {
    /// Receive the next frame
    ///
    /// Returns `None` once the emitter has been completed and every queued
    /// frame has been read. An emitter completed with an error yields one
    /// [`EmitterFrame::Error`] after the queued frames. The completion hook
    /// fires when `None` is returned.
    pub async fn recv(&mut self) -> Option<EmitterFrame> {
        if self.finished {
            return None;
        }

        loop {
            let next = match self.deadline {
                Some(deadline) => {
                    if let Ok(frame) = tokio::time::timeout_at(deadline, self.rx.recv()).await {
                        frame
                    } else {
                        self.deadline = None;
                        self.handle_timeout();
                        continue;
                    }
                }
                None => self.rx.recv().await,
            };

            match next {
                Some(frame) => return Some(frame),
                None => {
                    let pending = self.shared.pending_error.lock().take();
                    if let Some(error) = pending {
                        return Some(EmitterFrame::Error(error));
                    }
                    self.finish();
                    return None;
                }
            }
        }
    }

    /// Convert into a `Stream` of frames
    ///
    /// Dropping the stream before it ends counts as a client disconnect.
    pub fn into_stream(self) -> impl Stream<Item = EmitterFrame> + Send + 'static {
        futures::stream::unfold(self, |mut receiver| async move {
            receiver.recv().await.map(|frame| (frame, receiver))
        })
    }

    /// Whether the end of the stream has been reached
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn handle_timeout(&mut self) {
        tracing::debug!("Emitter timed out");
        let handled = self.shared.fire_timeout();

        // Nobody completed the emitter in response: end the response ourselves.
        if !handled || !self.shared.completed.load(Ordering::SeqCst) {
            self.shared.close(None);
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.shared.fire_completion();
    }
}

impl Drop for EmitterReceiver {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if self.shared.completed.load(Ordering::SeqCst) {
            self.shared.fire_completion();
        } else {
            self.shared.fire_error(TransportError::Disconnected);
            self.shared.fire_completion();
        }
    }
}
