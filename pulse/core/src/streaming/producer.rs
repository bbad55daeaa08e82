//! Tick Producers
//!
//! Two ways of driving a stream forward in time:
//!
//! - [`PeriodicProducer`]: an unbounded `0, 1, 2, ...` sequence on a fixed
//!   interval, running in its own task until stopped through its
//!   [`ProducerHandle`]
//! - [`drain_stages`]: a finite sequence of [`Stage`]s emitted strictly one
//!   after another, each value preceded by its stage's delay
//!
//! Neither retries anything. If the tick callback fails, the owner decides what
//! to do and stops the producer explicitly.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};

// ============================================================================
// Periodic Producer
// ============================================================================

struct ProducerState {
    stopped: AtomicBool,
    notify: Notify,
}

/// Cancellation handle of a running producer
///
/// Cloning the handle does not start another producer; all clones control the
/// same one. Stopping is cooperative and idempotent.
#[derive(Clone)]
pub struct ProducerHandle {
    state: Arc<ProducerState>,
}

impl ProducerHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(ProducerState {
                stopped: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Ask the producer to stop
    ///
    /// Returns `true` if this call made the request, `false` if the producer
    /// was already stopped.
    pub fn stop(&self) -> bool {
        if self.state.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state.notify.notify_one();
        true
    }

    /// Whether a stop has been requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    async fn stopped(&self) {
        if self.is_stopped() {
            return;
        }
        self.state.notify.notified().await;
    }
}

impl std::fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Fixed-cadence tick source
#[derive(Clone, Copy, Debug)]
pub struct PeriodicProducer {
    interval: Duration,
}

impl PeriodicProducer {
    /// Create a producer ticking every `interval` (clamped to at least 1ms)
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// The configured interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start a fresh tick sequence
    ///
    /// `on_tick` is called with `0, 1, 2, ...`, the first call one interval
    /// after `start`. Calls happen sequentially on a single task, so ticks
    /// never overlap. Every call to `start` begins again at 0.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start<F>(&self, mut on_tick: F) -> ProducerHandle
    where
        F: FnMut(u64) + Send + 'static,
    {
        let handle = ProducerHandle::new();
        let control = handle.clone();
        let period = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut sequence: u64 = 0;

            loop {
                tokio::select! {
                    biased;
                    () = control.stopped() => break,
                    _ = ticker.tick() => {}
                }

                if control.is_stopped() {
                    break;
                }

                on_tick(sequence);
                sequence += 1;
            }

            tracing::debug!(ticks = sequence, "Producer stopped");
        });

        handle
    }
}

// ============================================================================
// Finite Stages
// ============================================================================

/// A finite run of consecutive values
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stage {
    /// First value of the run
    pub first: i64,
    /// Number of values
    pub count: u32,
    /// Delay before each value
    pub delay: Duration,
}

impl Stage {
    /// Create a stage emitting `first..first + count`
    #[must_use]
    pub fn new(first: i64, count: u32, delay: Duration) -> Self {
        Self {
            first,
            count,
            delay,
        }
    }

    /// The values of this stage, in order
    pub fn values(&self) -> impl Iterator<Item = i64> {
        let first = self.first;
        (0..i64::from(self.count)).map(move |offset| first + offset)
    }
}

/// How a staged run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageOutcome {
    /// Every value of every stage was emitted
    Exhausted {
        /// Values emitted
        emitted: u64,
    },
    /// The callback asked to stop early
    Stopped {
        /// Values emitted before stopping, including the one that stopped
        emitted: u64,
    },
}

/// Emit every stage in order, fully draining each before starting the next
///
/// Stops as soon as `on_value` returns [`ControlFlow::Break`].
pub async fn drain_stages<F>(stages: &[Stage], mut on_value: F) -> StageOutcome
where
    F: FnMut(i64) -> ControlFlow<()>,
{
    let mut emitted: u64 = 0;

    for (index, stage) in stages.iter().enumerate() {
        tracing::debug!(stage = index + 1, first = stage.first, count = stage.count, "Stage started");
        for value in stage.values() {
            tokio::time::sleep(stage.delay).await;
            emitted += 1;
            if on_value(value).is_break() {
                return StageOutcome::Stopped { emitted };
            }
        }
    }

    StageOutcome::Exhausted { emitted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test(start_paused = true)]
    async fn test_producer_ticks_in_order_from_zero() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let producer = PeriodicProducer::new(Duration::from_millis(100));

        let handle = producer.start(move |n| sink.lock().push(n));
        tokio::time::sleep(Duration::from_millis(350)).await;
        handle.stop();

        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_producer_stops_and_stop_is_idempotent() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = PeriodicProducer::new(Duration::from_millis(10)).start(move |n| sink.lock().push(n));

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(handle.stop());
        assert!(!handle.stop());
        assert!(handle.is_stopped());

        let count = seen.lock().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.lock().len(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_from_inside_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let slot: Arc<Mutex<Option<ProducerHandle>>> = Arc::new(Mutex::new(None));
        let slot_in_tick = Arc::clone(&slot);

        let handle = PeriodicProducer::new(Duration::from_millis(10)).start(move |n| {
            sink.lock().push(n);
            if n == 1 {
                if let Some(handle) = slot_in_tick.lock().as_ref() {
                    handle.stop();
                }
            }
        });
        *slot.lock() = Some(handle);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_begins_at_zero() {
        let producer = PeriodicProducer::new(Duration::from_millis(10));
        for _ in 0..2 {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            let handle = producer.start(move |n| sink.lock().push(n));
            tokio::time::sleep(Duration::from_millis(15)).await;
            handle.stop();
            assert_eq!(seen.lock().first(), Some(&0));
        }
    }

    #[test]
    fn test_stage_values() {
        let stage = Stage::new(4, 3, Duration::ZERO);
        assert_eq!(stage.values().collect::<Vec<_>>(), vec![4, 5, 6]);
        assert_eq!(Stage::new(1, 0, Duration::ZERO).values().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_stages_in_order() {
        let delay = Duration::from_millis(300);
        let stages = vec![
            Stage::new(1, 3, delay),
            Stage::new(4, 3, delay),
            Stage::new(7, 3, delay),
        ];
        let mut seen = Vec::new();

        let outcome = drain_stages(&stages, |v| {
            seen.push(v);
            ControlFlow::Continue(())
        })
        .await;

        assert_eq!(outcome, StageOutcome::Exhausted { emitted: 9 });
        assert_eq!(seen, (1..=9).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_stages_waits_for_each_delay() {
        let start = Instant::now();
        let stages = vec![Stage::new(1, 2, Duration::from_millis(300))];
        drain_stages(&stages, |_| ControlFlow::Continue(())).await;
        assert!(start.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_stages_stops_on_break() {
        let stages = vec![Stage::new(1, 5, Duration::from_millis(1))];
        let outcome = drain_stages(&stages, |v| {
            if v == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await;

        assert_eq!(outcome, StageOutcome::Stopped { emitted: 2 });
    }
}
