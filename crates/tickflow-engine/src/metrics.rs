//! Per-tick counters of the scheduler.
//!
//! [`TickMetrics`] holds the values of the most recent tick next to
//! running totals since the environment was created.

use std::time::Duration;

/// Counters of one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickCounters {
    /// Entities whose actor was stepped (begun or resumed).
    pub entities_stepped: u64,
    /// Step workers spawned.
    pub workers_spawned: u64,
    /// Step workers joined.
    pub workers_joined: u64,
    /// Deferred events run during the flush.
    pub events_run: u64,
    /// Messages enqueued into mailboxes.
    pub messages_delivered: u64,
    /// Ledger violations detected.
    pub protocol_violations: u64,
}

impl TickCounters {
    fn accumulate(&mut self, other: &TickCounters) {
        self.entities_stepped += other.entities_stepped;
        self.workers_spawned += other.workers_spawned;
        self.workers_joined += other.workers_joined;
        self.events_run += other.events_run;
        self.messages_delivered += other.messages_delivered;
        self.protocol_violations += other.protocol_violations;
    }
}

/// Timing and counters of the most recent tick plus cumulative totals.
#[derive(Clone, Debug, Default)]
pub struct TickMetrics {
    /// Ticks executed so far.
    pub ticks: u64,
    /// Wall-clock time of the last tick, in microseconds.
    pub last_tick_us: u64,
    /// Counters of the last tick.
    pub last: TickCounters,
    /// Counters summed over all ticks.
    pub total: TickCounters,
    /// Counters of the tick in progress.
    pub(crate) current: TickCounters,
}

impl TickMetrics {
    /// Close the tick in progress.
    pub(crate) fn finish_tick(&mut self, wall: Duration) {
        self.ticks += 1;
        self.last_tick_us = wall.as_micros() as u64;
        self.last = std::mem::take(&mut self.current);
        self.total.accumulate(&self.last);
    }
}
