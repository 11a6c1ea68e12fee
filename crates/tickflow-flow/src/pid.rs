//! Continuous PID rate estimation per inbound path.
//!
//! On every batch completion the estimator measures the processing rate
//! of that batch and moves its running estimate toward it:
//!
//! ```text
//! processing_rate  = elements / processing_delay
//! error            = last_rate - processing_rate
//! historical_error = scheduling_delay * processing_rate / batch_interval
//! derivative       = (error - last_error) / elapsed
//! new_rate         = max(last_rate - P*error - I*historical_error - D*derivative, min_rate)
//! ```
//!
//! `historical_error` estimates the systematic error caused by batches
//! waiting in the mailbox. The floor keeps transient spikes from
//! collapsing the estimate to zero or below.

use indexmap::IndexMap;
use tickflow_core::{PathId, Tick, TickDuration};

use crate::config::PidConfig;

/// Mutable estimator state for one path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateState {
    /// Completion time of the last sample.
    pub last_time: Tick,
    /// Time between the last two samples.
    pub batch_interval: TickDuration,
    /// Current estimate, in elements per second.
    pub last_rate: f64,
    /// Error term of the last update.
    pub last_error: f64,
}

/// Floor-clamped PID estimator over all inbound paths of one consumer.
#[derive(Clone, Debug)]
pub struct PidEstimator {
    config: PidConfig,
    states: IndexMap<PathId, RateState>,
}

impl PidEstimator {
    /// Create an estimator with no per-path state.
    pub fn new(config: PidConfig) -> Self {
        Self {
            config,
            states: IndexMap::new(),
        }
    }

    /// Current state for `path`, if it has reported at least one sample.
    pub fn state(&self, path: PathId) -> Option<&RateState> {
        self.states.get(&path)
    }

    /// Current estimate for `path`, or the floor if it has none yet.
    pub fn rate(&self, path: PathId) -> f64 {
        self.states
            .get(&path)
            .map_or(self.config.min_rate, |s| s.last_rate)
    }

    /// Drop the state of a closed path.
    pub fn forget(&mut self, path: PathId) {
        self.states.shift_remove(&path);
    }

    /// Fold one batch completion into the estimate for `path` and return
    /// the new rate in elements per second.
    ///
    /// Degenerate samples (no elements, zero processing delay, or no time
    /// elapsed since the previous sample) leave the estimate unchanged.
    pub fn update_rate(
        &mut self,
        path: PathId,
        time: Tick,
        num_elements: u64,
        processing_delay: TickDuration,
        scheduling_delay: TickDuration,
    ) -> f64 {
        if num_elements == 0 || processing_delay.is_zero() {
            return self.rate(path);
        }
        let processing_rate = num_elements as f64 / processing_delay.as_secs_f64();
        let min_rate = self.config.min_rate;
        let Some(state) = self.states.get_mut(&path) else {
            let initial = processing_rate.max(min_rate);
            self.states.insert(
                path,
                RateState {
                    last_time: time,
                    batch_interval: TickDuration::ZERO,
                    last_rate: initial,
                    last_error: 0.0,
                },
            );
            return initial;
        };
        let elapsed = time - state.last_time;
        if elapsed.is_zero() {
            return state.last_rate;
        }
        state.batch_interval = elapsed;
        let elapsed_secs = elapsed.as_secs_f64();
        let error = state.last_rate - processing_rate;
        let historical_error = scheduling_delay.as_secs_f64() * processing_rate / elapsed_secs;
        let derivative = (error - state.last_error) / elapsed_secs;
        let raw = state.last_rate
            - self.config.proportional * error
            - self.config.integral * historical_error
            - self.config.derivative * derivative;
        // f64::max discards a NaN operand, so the floor also absorbs NaN.
        let new_rate = raw.max(min_rate);
        state.last_time = time;
        state.last_rate = new_rate;
        state.last_error = error;
        new_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn estimator() -> PidEstimator {
        PidEstimator::new(PidConfig::default())
    }

    #[test]
    fn first_sample_seeds_the_estimate() {
        let mut e = estimator();
        // 10 elements in 100 ticks = 100_000 elements/s.
        let r = e.update_rate(PathId(0), Tick(100), 10, TickDuration(100), TickDuration::ZERO);
        assert!((r - 100_000.0).abs() < 1e-6);
        let s = e.state(PathId(0)).unwrap();
        assert_eq!(s.last_time, Tick(100));
        assert_eq!(s.last_error, 0.0);
    }

    #[test]
    fn proportional_step_tracks_measured_rate_without_backlog() {
        let mut e = estimator();
        e.update_rate(PathId(0), Tick(100), 10, TickDuration(100), TickDuration::ZERO);
        // 20 elements in 100 ticks = 200_000/s; P=1 moves straight to it.
        let r = e.update_rate(PathId(0), Tick(200), 20, TickDuration(100), TickDuration::ZERO);
        assert!((r - 200_000.0).abs() < 1e-6);
        assert_eq!(e.state(PathId(0)).unwrap().batch_interval, TickDuration(100));
    }

    #[test]
    fn backlog_lowers_the_estimate() {
        let mut e = estimator();
        e.update_rate(PathId(0), Tick(100), 10, TickDuration(100), TickDuration::ZERO);
        // Same rate, but the batch waited 50 ticks in a 100 tick interval:
        // historical_error = 0.5 * 100_000, scaled by I = 0.2.
        let r = e.update_rate(PathId(0), Tick(200), 10, TickDuration(100), TickDuration(50));
        assert!((r - 90_000.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_samples_hold_the_estimate() {
        let mut e = estimator();
        assert_eq!(
            e.update_rate(PathId(0), Tick(5), 0, TickDuration(10), TickDuration::ZERO),
            100.0
        );
        assert!(e.state(PathId(0)).is_none());
        let seeded = e.update_rate(PathId(0), Tick(5), 10, TickDuration(100), TickDuration::ZERO);
        assert_eq!(
            e.update_rate(PathId(0), Tick(9), 10, TickDuration::ZERO, TickDuration::ZERO),
            seeded
        );
        // No time elapsed since the previous sample.
        assert_eq!(
            e.update_rate(PathId(0), Tick(5), 1, TickDuration(1), TickDuration::ZERO),
            seeded
        );
        assert_eq!(e.state(PathId(0)).unwrap().last_time, Tick(5));
    }

    #[test]
    fn paths_are_independent() {
        let mut e = estimator();
        e.update_rate(PathId(0), Tick(10), 10, TickDuration(100), TickDuration::ZERO);
        assert_eq!(e.rate(PathId(1)), 100.0);
        e.forget(PathId(0));
        assert!(e.state(PathId(0)).is_none());
    }

    proptest! {
        #[test]
        fn estimate_never_drops_below_floor(
            samples in proptest::collection::vec(
                (1u64..1_000, 0u64..10_000, 0u64..10_000, 0u64..10_000),
                1..64,
            ),
            derivative in -10.0f64..10.0,
            integral in 0.0f64..10.0,
        ) {
            let mut e = PidEstimator::new(PidConfig {
                derivative,
                integral,
                ..PidConfig::default()
            });
            let mut t = 0u64;
            for (gap, elements, processing, scheduling) in samples {
                t += gap;
                let r = e.update_rate(
                    PathId(0),
                    Tick(t),
                    elements,
                    TickDuration(processing),
                    TickDuration(scheduling),
                );
                prop_assert!(r >= 100.0, "rate {} fell below floor", r);
            }
        }
    }
}
