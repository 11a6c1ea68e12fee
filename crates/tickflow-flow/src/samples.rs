//! Bounded history of `(timestamp, elements)` throughput samples.

use std::collections::VecDeque;

use tickflow_core::{Tick, TickDuration, TICKS_PER_SECOND_OF_SIM};

/// Default number of samples retained per path.
pub const DEFAULT_SAMPLE_CAPACITY: usize = 1000;

/// Window used by [`ThroughputSamples::last_rate`]: one simulated second.
pub const RATE_WINDOW: TickDuration = TickDuration(TICKS_PER_SECOND_OF_SIM);

/// Fixed-capacity ring of throughput samples, oldest first.
///
/// Timestamps must be pushed in non-decreasing order; this keeps the
/// ring sorted so windowed queries can binary-search it.
#[derive(Clone, Debug)]
pub struct ThroughputSamples {
    samples: VecDeque<(Tick, u64)>,
    capacity: usize,
}

impl Default for ThroughputSamples {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_CAPACITY)
    }
}

impl ThroughputSamples {
    /// Create an empty ring holding at most `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ThroughputSamples capacity must be > 0");
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record that `elements` items moved at `tstamp`, evicting the oldest
    /// sample when full.
    pub fn push(&mut self, tstamp: Tick, elements: u64) {
        debug_assert!(
            self.samples.back().is_none_or(|&(t, _)| t <= tstamp),
            "throughput samples must be pushed in timestamp order"
        );
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((tstamp, elements));
    }

    /// Total elements recorded in `[now - 1s, now]`, clamped at tick zero.
    pub fn last_rate(&self, now: Tick) -> u64 {
        let start = Tick(now.0.saturating_sub(RATE_WINDOW.0));
        let lo = self.samples.partition_point(|&(t, _)| t < start);
        let hi = self.samples.partition_point(|&(t, _)| t <= now);
        self.samples
            .range(lo..hi.max(lo))
            .map(|&(_, n)| n)
            .sum()
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples have been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent sample, if any.
    pub fn latest(&self) -> Option<(Tick, u64)> {
        self.samples.back().copied()
    }
}
