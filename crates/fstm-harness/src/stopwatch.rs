//! Wall-clock accounting for phase runtimes.

use std::time::{Duration, Instant};

/// A stopwatch accumulating monotonic time across start/stop segments.
#[derive(Debug, Default)]
pub struct Stopwatch {
    total: Duration,
    started: Option<Instant>,
}

impl Stopwatch {
    /// A stopped stopwatch with zero accumulated time.
    #[must_use]
    pub const fn new() -> Self {
        Self { total: Duration::ZERO, started: None }
    }

    /// Start a segment. Restarting a running segment discards the running
    /// one.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// End the running segment, adding it to the total. No-op if stopped.
    pub fn stop(&mut self) {
        if let Some(at) = self.started.take() {
            self.total += at.elapsed();
        }
    }

    /// Accumulated time over all finished segments.
    #[must_use]
    pub const fn total(&self) -> Duration {
        self.total
    }

    /// Forget all accumulated time, keep the stopwatch stopped.
    pub fn reset(&mut self) {
        self.total = Duration::ZERO;
        self.started = None;
    }

    /// Accumulated time, resetting the stopwatch. Used by the phase machine
    /// to hand out per-phase runtimes.
    pub fn take(&mut self) -> Duration {
        let total = self.total;
        self.reset();
        total
    }
}

/// Partition `times` around the median index and return the median value.
///
/// The full array is not sorted; only the median element is placed.
#[must_use]
pub fn median_duration(times: &mut [Duration]) -> Duration {
    assert!(!times.is_empty(), "median of no runtimes");
    let mid = times.len() / 2;
    let (_, median, _) = times.select_nth_unstable(mid);
    *median
}
