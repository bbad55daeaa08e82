//! Phase Formatting
//!
//! Maps a tick number onto a phase (label, status, message). This is the demo
//! payload policy for the simple and multi-stage streams: it is pure, it holds
//! no state, and the stream manager only sees it through [`EventFormatter`].

use std::ops::RangeInclusive;

/// Label/status/message triple describing one tick
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phase {
    /// Event label (e.g. `INITIALIZATION`)
    pub label: String,
    /// Event status (e.g. `processing`)
    pub status: String,
    /// Human-readable message
    pub message: String,
}

impl Phase {
    /// Create a new phase
    pub fn new(
        label: impl Into<String>,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            status: status.into(),
            message: message.into(),
        }
    }

    /// The phase used for ticks outside every known range
    #[must_use]
    pub fn unknown() -> Self {
        Self::new("UNKNOWN", "unknown", "Unknown state")
    }
}

/// Policy mapping tick numbers to phases
pub trait EventFormatter: Send + Sync {
    /// Describe the given tick
    fn describe(&self, tick: i64) -> Phase;
}

/// Ordered partition of the tick range into phases
///
/// The first range containing the tick wins; anything not covered maps to
/// [`Phase::unknown`].
#[derive(Clone, Debug)]
pub struct PhaseTable {
    phases: Vec<(RangeInclusive<i64>, Phase)>,
}

impl PhaseTable {
    /// Create an empty table (every tick is `UNKNOWN`)
    #[must_use]
    pub fn new() -> Self {
        Self { phases: Vec::new() }
    }

    /// Append a phase covering `range`
    #[must_use]
    pub fn with_phase(mut self, range: RangeInclusive<i64>, phase: Phase) -> Self {
        self.phases.push((range, phase));
        self
    }

    /// Number of configured phases
    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Whether no phase is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

impl Default for PhaseTable {
    /// `1-3` initialization, `4-6` processing, `7-9` verification, `10` completed
    fn default() -> Self {
        Self::new()
            .with_phase(
                1..=3,
                Phase::new("INITIALIZATION", "processing", "Initializing..."),
            )
            .with_phase(
                4..=6,
                Phase::new("PROCESSING", "processing", "Processing data..."),
            )
            .with_phase(
                7..=9,
                Phase::new("VERIFICATION", "processing", "Verifying results..."),
            )
            .with_phase(10..=10, Phase::new("COMPLETED", "completed", "Done!"))
    }
}

impl EventFormatter for PhaseTable {
    fn describe(&self, tick: i64) -> Phase {
        self.phases
            .iter()
            .find(|(range, _)| range.contains(&tick))
            .map_or_else(Phase::unknown, |(_, phase)| phase.clone())
    }
}
