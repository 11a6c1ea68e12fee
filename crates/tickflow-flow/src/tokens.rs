//! Cycle-based token generation.
//!
//! The generator accumulates processing time and processed items from
//! batch-completion reports. Once per control cycle it converts them
//! into a token budget for the next cycle and spreads that budget over
//! the inbound paths.
//!
//! # Carry-forward
//!
//! An idle cycle never pushes the budget to zero. If nothing was
//! processed, if the clock has not moved, if no cycle has run yet, or if
//! the measured cost per item is zero, the previous token count is
//! repeated.

use indexmap::IndexMap;
use tickflow_core::{PathId, Tick, TickDuration};
use tracing::debug;

use crate::config::TokenConfig;
use crate::controller::{CreditGrant, CycleTimer};
use crate::path::InboundPath;

/// Outcome of one [`TokenGenerator::generate_tokens`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenCycle {
    /// Tokens available for the next cycle.
    pub tokens: u64,
    /// Current batch size hint.
    pub batch_size_hint: u64,
    /// Whether the hint changed during this cycle.
    pub hint_changed: bool,
    /// Credit handed to individual paths.
    pub grants: Vec<CreditGrant>,
    /// Timer that closes the next cycle.
    pub timer: CycleTimer,
}

/// Per-consumer token generator state.
#[derive(Clone, Debug)]
pub struct TokenGenerator {
    config: TokenConfig,
    batch_size_hint: u64,
    /// Timestamp of the last `generate_tokens` call; `None` before the first.
    last_cycle: Option<Tick>,
    last_token_count: u64,
    processing_time: TickDuration,
    processed_items: u64,
    cycle_timeout: u64,
}

impl TokenGenerator {
    /// Create a generator in its initial (no cycle yet) state.
    pub fn new(config: TokenConfig) -> Self {
        Self {
            batch_size_hint: config.initial_batch_size_hint.max(config.min_batch_size),
            last_token_count: config.min_tokens,
            last_cycle: None,
            processing_time: TickDuration::ZERO,
            processed_items: 0,
            cycle_timeout: 0,
            config,
        }
    }

    /// Credit granted to a freshly opened path.
    pub fn initial_credit(&self) -> u64 {
        self.config.min_tokens
    }

    /// Current batch size hint.
    pub fn batch_size_hint(&self) -> u64 {
        self.batch_size_hint
    }

    /// Token count produced by the most recent cycle.
    pub fn last_token_count(&self) -> u64 {
        self.last_token_count
    }

    /// Sequence number of the currently armed cycle timer.
    pub fn cycle_timeout(&self) -> u64 {
        self.cycle_timeout
    }

    /// Items processed since the last cycle.
    pub fn processed_items(&self) -> u64 {
        self.processed_items
    }

    /// Processing time accumulated since the last cycle.
    pub fn processing_time(&self) -> TickDuration {
        self.processing_time
    }

    /// Control cycle length.
    pub fn cycle_duration(&self) -> TickDuration {
        self.config.cycle_duration
    }

    /// Record a completed batch.
    ///
    /// Closes the cycle early (returning its outcome) once the batch end
    /// crosses the current cycle boundary.
    pub fn batch_completed(
        &mut self,
        xs_size: u64,
        started: Tick,
        finished: Tick,
        now: Tick,
        paths: &mut IndexMap<PathId, InboundPath>,
    ) -> Option<TokenCycle> {
        debug_assert!(finished >= started, "batch finished before it started");
        self.processed_items += xs_size;
        self.processing_time += finished - started;
        let boundary = self.last_cycle.unwrap_or(Tick::ZERO) + self.config.cycle_duration;
        if finished >= boundary {
            Some(self.generate_tokens(now, paths))
        } else {
            None
        }
    }

    /// Handle a fired cycle timer. Stale timers (superseded by an early
    /// cycle) are ignored.
    pub fn on_cycle_timeout(
        &mut self,
        nr: u64,
        now: Tick,
        paths: &mut IndexMap<PathId, InboundPath>,
    ) -> Option<TokenCycle> {
        if nr != self.cycle_timeout {
            return None;
        }
        Some(self.generate_tokens(now, paths))
    }

    /// Close the current cycle and compute the token budget for the next.
    pub fn generate_tokens(
        &mut self,
        now: Tick,
        paths: &mut IndexMap<PathId, InboundPath>,
    ) -> TokenCycle {
        let mut hint_changed = false;
        let carry_forward = match self.last_cycle {
            None => true,
            Some(last) => self.processed_items == 0 || now <= last,
        };
        let tokens = if carry_forward {
            self.last_token_count
        } else {
            let time_per_item = self.processing_time.0 as f64 / self.processed_items as f64;
            if time_per_item == 0.0 {
                self.last_token_count
            } else {
                // Theoretical maximum when processing batches nonstop.
                let upper_bound = self.config.cycle_duration.0 as f64 / time_per_item;
                let hint = ((self.config.desired_batch_complexity.0 as f64 / time_per_item).round()
                    as u64)
                    .max(self.config.min_batch_size);
                if hint != self.batch_size_hint {
                    self.batch_size_hint = hint;
                    hint_changed = true;
                    for path in paths.values_mut() {
                        path.desired_batch_size = hint;
                    }
                }
                upper_bound.max(self.config.min_tokens as f64) as u64
            }
        };
        self.last_cycle = Some(now);
        self.last_token_count = tokens;
        let grants = assign_credit(tokens, paths);
        self.processing_time = TickDuration::ZERO;
        self.processed_items = 0;
        self.cycle_timeout += 1;
        debug!(
            tokens,
            batch_size_hint = self.batch_size_hint,
            paths = paths.len(),
            carry_forward,
            "generated tokens"
        );
        TokenCycle {
            tokens,
            batch_size_hint: self.batch_size_hint,
            hint_changed,
            grants,
            timer: CycleTimer {
                nr: self.cycle_timeout,
                at: now + self.config.cycle_duration,
            },
        }
    }
}

/// Spread `available` credit evenly over `paths`.
///
/// Each path is topped up toward an equal share. Credit already granted
/// is never reclaimed, and paths at or above their share get nothing.
pub fn assign_credit(
    available: u64,
    paths: &mut IndexMap<PathId, InboundPath>,
) -> Vec<CreditGrant> {
    if paths.is_empty() {
        return Vec::new();
    }
    let per_path = available / paths.len() as u64;
    let mut grants = Vec::new();
    for path in paths.values_mut() {
        path.target_credit = per_path;
        let credit = per_path.saturating_sub(path.assigned_credit);
        if credit > 0 {
            path.assigned_credit += credit;
            grants.push(CreditGrant {
                path: path.id,
                to: path.from,
                credit,
                desired_batch_size: path.desired_batch_size,
            });
        }
    }
    grants
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tickflow_core::EntityId;

    fn paths(credits: &[u64]) -> IndexMap<PathId, InboundPath> {
        credits
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let mut p = InboundPath::new(PathId(i as u32), EntityId(i as u32), 50);
                p.assigned_credit = c;
                (p.id, p)
            })
            .collect()
    }

    fn reference_config() -> TokenConfig {
        TokenConfig {
            cycle_duration: TickDuration(100),
            min_tokens: 100,
            desired_batch_complexity: TickDuration(20),
            min_batch_size: 5,
            initial_batch_size_hint: 50,
        }
    }

    #[test]
    fn first_cycle_carries_forward_min_tokens() {
        let mut gen = TokenGenerator::new(reference_config());
        let mut ps = paths(&[0]);
        let cycle = gen.generate_tokens(Tick(100), &mut ps);
        assert_eq!(cycle.tokens, 100);
        assert_eq!(cycle.timer, CycleTimer { nr: 1, at: Tick(200) });
    }

    #[test]
    fn measured_cycle_matches_reference_scenario() {
        let mut gen = TokenGenerator::new(reference_config());
        let mut ps = paths(&[100]);
        gen.generate_tokens(Tick(100), &mut ps);

        // 50 items at 10 ticks each: time_per_item = 10.
        gen.processed_items = 50;
        gen.processing_time = TickDuration(500);
        let cycle = gen.generate_tokens(Tick(200), &mut ps);

        // upper_bound = 100 / 10 = 10, clamped up to min_tokens.
        assert_eq!(cycle.tokens, 100);
        // hint = max(5, round(20 / 10)) = 5.
        assert_eq!(cycle.batch_size_hint, 5);
        assert!(cycle.hint_changed);
        assert_eq!(ps[&PathId(0)].desired_batch_size, 5);
        assert_eq!(gen.processed_items(), 0);
        assert_eq!(gen.processing_time(), TickDuration::ZERO);
    }

    #[test]
    fn fast_consumer_gets_more_than_the_floor() {
        let mut gen = TokenGenerator::new(reference_config());
        let mut ps = paths(&[0]);
        gen.generate_tokens(Tick(100), &mut ps);
        // 400 items in 100 ticks: time_per_item = 0.25.
        gen.processed_items = 400;
        gen.processing_time = TickDuration(100);
        let cycle = gen.generate_tokens(Tick(200), &mut ps);
        assert_eq!(cycle.tokens, 400);
        assert_eq!(cycle.batch_size_hint, 80);
    }

    #[test]
    fn idle_cycle_repeats_previous_count() {
        let mut gen = TokenGenerator::new(reference_config());
        let mut ps = paths(&[0]);
        gen.generate_tokens(Tick(100), &mut ps);
        gen.processed_items = 400;
        gen.processing_time = TickDuration(100);
        let busy = gen.generate_tokens(Tick(200), &mut ps);
        let idle1 = gen.generate_tokens(Tick(300), &mut ps);
        let idle2 = gen.generate_tokens(Tick(400), &mut ps);
        assert_eq!(busy.tokens, 400);
        assert_eq!(idle1.tokens, 400);
        assert_eq!(idle2.tokens, 400);
    }

    #[test]
    fn zero_cost_items_hold_the_estimate() {
        let mut gen = TokenGenerator::new(reference_config());
        let mut ps = paths(&[0]);
        gen.generate_tokens(Tick(100), &mut ps);
        gen.processed_items = 10;
        gen.processing_time = TickDuration::ZERO;
        let cycle = gen.generate_tokens(Tick(200), &mut ps);
        assert_eq!(cycle.tokens, 100);
        assert!(!cycle.hint_changed);
    }

    #[test]
    fn clock_standing_still_holds_the_estimate() {
        let mut gen = TokenGenerator::new(reference_config());
        let mut ps = paths(&[0]);
        gen.generate_tokens(Tick(100), &mut ps);
        gen.processed_items = 400;
        gen.processing_time = TickDuration(100);
        assert_eq!(gen.generate_tokens(Tick(100), &mut ps).tokens, 100);
    }

    #[test]
    fn batch_crossing_the_boundary_closes_the_cycle_early() {
        let mut gen = TokenGenerator::new(reference_config());
        let mut ps = paths(&[0]);
        gen.generate_tokens(Tick(100), &mut ps);
        assert!(gen
            .batch_completed(10, Tick(120), Tick(150), Tick(150), &mut ps)
            .is_none());
        let cycle = gen
            .batch_completed(10, Tick(150), Tick(210), Tick(210), &mut ps)
            .expect("boundary at tick 200 crossed");
        // 20 items over 90 ticks.
        assert_eq!(cycle.tokens, 100);
        assert_eq!(gen.cycle_timeout(), 2);
    }

    #[test]
    fn stale_timeouts_are_ignored() {
        let mut gen = TokenGenerator::new(reference_config());
        let mut ps = paths(&[0]);
        let first = gen.generate_tokens(Tick(100), &mut ps);
        let second = gen.generate_tokens(Tick(150), &mut ps);
        assert!(gen.on_cycle_timeout(first.timer.nr, Tick(200), &mut ps).is_none());
        assert!(gen
            .on_cycle_timeout(second.timer.nr, Tick(250), &mut ps)
            .is_some());
    }

    #[test]
    fn credit_tops_up_toward_equal_share() {
        let mut ps = paths(&[50, 50, 50]);
        let grants = assign_credit(300, &mut ps);
        assert_eq!(grants.len(), 3);
        assert!(grants.iter().all(|g| g.credit == 50));
        assert!(ps.values().all(|p| p.assigned_credit == 100));
    }

    #[test]
    fn credit_is_never_reclaimed() {
        let mut ps = paths(&[150, 0]);
        let grants = assign_credit(200, &mut ps);
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].path, PathId(1));
        assert_eq!(grants[0].credit, 100);
        assert_eq!(ps[&PathId(0)].assigned_credit, 150);
    }

    #[test]
    fn no_paths_no_grants() {
        let mut ps = IndexMap::new();
        assert!(assign_credit(1000, &mut ps).is_empty());
    }

    proptest! {
        #[test]
        fn idle_cycles_are_idempotent(
            items in 1u64..10_000,
            time in 0u64..100_000,
            gap in 1u64..1_000,
        ) {
            let mut gen = TokenGenerator::new(reference_config());
            let mut ps = paths(&[0, 0]);
            gen.generate_tokens(Tick(100), &mut ps);
            gen.processed_items = items;
            gen.processing_time = TickDuration(time);
            gen.generate_tokens(Tick(100 + gap), &mut ps);
            let a = gen.generate_tokens(Tick(100 + 2 * gap), &mut ps).tokens;
            let b = gen.generate_tokens(Tick(100 + 3 * gap), &mut ps).tokens;
            prop_assert_eq!(a, b);
            prop_assert!(a >= 100);
        }

        #[test]
        fn grants_never_exceed_share(
            available in 0u64..10_000,
            credits in proptest::collection::vec(0u64..5_000, 1..8),
        ) {
            let mut ps = paths(&credits);
            let share = available / credits.len() as u64;
            for g in assign_credit(available, &mut ps) {
                prop_assert!(g.credit > 0);
                prop_assert!(g.credit <= share);
            }
            for (p, before) in ps.values().zip(&credits) {
                prop_assert_eq!(p.assigned_credit, (*before).max(share));
            }
        }
    }
}
