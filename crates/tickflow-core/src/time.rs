//! The simulated clock: [`Tick`] timestamps and [`TickDuration`] deltas.
//!
//! One tick is one microsecond of simulated time. The resolution only
//! matters where rates are expressed per second (the PID estimator and
//! the outbound throughput window); everything else counts raw ticks.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};

/// Number of ticks in one second of simulated time.
pub const TICKS_PER_SECOND_OF_SIM: u64 = 1_000_000;

/// Monotonically non-decreasing simulation timestamp.
///
/// `Tick(0)` is the instant before the first `tick()` call. The
/// environment advances it by exactly one per executed tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tick(pub u64);

impl Tick {
    /// The start of every simulation run.
    pub const ZERO: Tick = Tick(0);

    /// The tick immediately after `self`.
    pub fn next(self) -> Tick {
        Tick(self.0.saturating_add(1))
    }

    /// Time elapsed since `earlier`, or zero if `earlier` lies in the future.
    pub fn saturating_since(self, earlier: Tick) -> TickDuration {
        TickDuration(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Tick {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Add<TickDuration> for Tick {
    type Output = Tick;

    fn add(self, rhs: TickDuration) -> Tick {
        Tick(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<TickDuration> for Tick {
    fn add_assign(&mut self, rhs: TickDuration) {
        *self = *self + rhs;
    }
}

impl Sub for Tick {
    type Output = TickDuration;

    /// Saturates at zero: a timestamp difference is never negative.
    fn sub(self, rhs: Tick) -> TickDuration {
        self.saturating_since(rhs)
    }
}

/// A non-negative span of simulated time, in ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickDuration(pub u64);

impl TickDuration {
    /// The empty duration.
    pub const ZERO: TickDuration = TickDuration(0);

    /// Construct a duration of `n` ticks.
    pub const fn ticks(n: u64) -> Self {
        Self(n)
    }

    /// Whether this duration spans no time at all.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// The duration expressed in seconds of simulated time.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / TICKS_PER_SECOND_OF_SIM as f64
    }
}

impl fmt::Display for TickDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TickDuration {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Add for TickDuration {
    type Output = TickDuration;

    fn add(self, rhs: TickDuration) -> TickDuration {
        TickDuration(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for TickDuration {
    fn add_assign(&mut self, rhs: TickDuration) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for TickDuration {
    fn sum<I: Iterator<Item = TickDuration>>(iter: I) -> Self {
        iter.fold(TickDuration::ZERO, Add::add)
    }
}
