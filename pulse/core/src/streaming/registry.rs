//! Stream Registry
//!
//! Concurrent map from [`StreamId`] to the live [`StreamContext`]. Backed by a
//! sharded `DashMap`, so opening or tearing down one stream never blocks
//! unrelated streams behind a global lock.
//!
//! A separate live counter is reserved before an entry is inserted, so the
//! stream limit holds exactly even when opens race each other.
//!
//! The registry is an ordinary value owned by whoever creates it and injected
//! into the [`StreamManager`](super::StreamManager); clones share the same map.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::context::StreamContext;
use super::stream_manager::StreamError;
use crate::events::StreamId;

/// Shared map of live streams
#[derive(Clone, Default)]
pub struct StreamRegistry {
    inner: Arc<DashMap<StreamId, Arc<StreamContext>>>,
    live: Arc<AtomicUsize>,
}

impl StreamRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a context unless its id is already live or the registry is full
    ///
    /// Both the limit and the duplicate check are exact under concurrent
    /// inserts.
    ///
    /// # Errors
    ///
    /// - [`StreamError::MaxStreamsReached`] when `max_streams` are live
    /// - [`StreamError::AlreadyExists`] when the id is already registered
    pub fn try_insert(
        &self,
        context: Arc<StreamContext>,
        max_streams: usize,
    ) -> Result<(), StreamError> {
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < max_streams).then_some(live + 1)
            })
            .map_err(|_| StreamError::MaxStreamsReached { max: max_streams })?;

        match self.inner.entry(context.stream_id().clone()) {
            Entry::Occupied(occupied) => {
                self.live.fetch_sub(1, Ordering::SeqCst);
                Err(StreamError::AlreadyExists(occupied.key().clone()))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(context);
                Ok(())
            }
        }
    }

    /// Look up a live context
    #[must_use]
    pub fn get(&self, stream_id: &StreamId) -> Option<Arc<StreamContext>> {
        self.inner.get(stream_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove `context` if it is still the one registered under its id
    ///
    /// A context that has already been replaced never removes its successor.
    pub fn remove(&self, context: &Arc<StreamContext>) -> bool {
        let removed = self
            .inner
            .remove_if(context.stream_id(), |_, current| Arc::ptr_eq(current, context))
            .is_some();
        if removed {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    /// Whether a stream id is live
    #[must_use]
    pub fn contains(&self, stream_id: &StreamId) -> bool {
        self.inner.contains_key(stream_id)
    }

    /// Number of live streams
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no stream is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Ids of all live streams
    #[must_use]
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of all live contexts
    #[must_use]
    pub fn contexts(&self) -> Vec<Arc<StreamContext>> {
        self.inner.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("live", &self.len())
            .finish()
    }
}
