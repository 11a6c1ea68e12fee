//! The consumer side of flow control.
//!
//! A [`Gatherer`] owns the inbound paths of one consumer and a
//! [`RateController`] chosen at construction. It turns stream events
//! (path opened, batch received, batch completed, cycle timer fired) into
//! [`FlowUpdate`]s: credit to send upstream and timers to arm.

use indexmap::IndexMap;
use tickflow_core::{BatchId, EntityId, PathId, Tick, TickDuration};
use tracing::{debug, trace};

use crate::config::{RateConfig, RateKind, TokenConfig};
use crate::path::InboundPath;
use crate::pid::PidEstimator;
use crate::tokens::{TokenCycle, TokenGenerator};

// ── Output types ───────────────────────────────────────────────────

/// Credit handed to the producer at the far end of an inbound path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreditGrant {
    /// Path the credit applies to.
    pub path: PathId,
    /// Producer that receives the grant.
    pub to: EntityId,
    /// Additional items the producer may emit.
    pub credit: u64,
    /// Preferred items per batch.
    pub desired_batch_size: u64,
}

/// A control-cycle timer to arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleTimer {
    /// Sequence number; only the latest one is honoured.
    pub nr: u64,
    /// Absolute tick at which the timer fires.
    pub at: Tick,
}

/// Timing of one fully processed batch, as seen by the consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchReport {
    /// Path the batch arrived on.
    pub path: PathId,
    /// Items in the batch.
    pub size: u64,
    /// When the batch entered the mailbox.
    pub enqueued: Tick,
    /// When processing of the first item began.
    pub started: Tick,
    /// When the last item was done.
    pub finished: Tick,
}

impl BatchReport {
    /// Ticks spent processing the batch.
    pub fn processing_delay(&self) -> TickDuration {
        self.finished - self.started
    }

    /// Ticks the batch waited in the mailbox before processing began.
    pub fn scheduling_delay(&self) -> TickDuration {
        self.started - self.enqueued
    }
}

/// Side effects requested by the gatherer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowUpdate {
    /// Credit to send upstream, one message per grant.
    pub grants: Vec<CreditGrant>,
    /// Cycle timer to (re-)arm.
    pub timer: Option<CycleTimer>,
    /// Token count of a freshly closed cycle.
    pub tokens: Option<u64>,
}

impl FlowUpdate {
    /// Whether the update asks for nothing.
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty() && self.timer.is_none() && self.tokens.is_none()
    }
}

impl From<TokenCycle> for FlowUpdate {
    fn from(cycle: TokenCycle) -> Self {
        Self {
            grants: cycle.grants,
            timer: Some(cycle.timer),
            tokens: Some(cycle.tokens),
        }
    }
}

// ── RateController ─────────────────────────────────────────────────

/// The estimator variant a consumer runs.
#[derive(Clone, Debug)]
pub enum RateController {
    /// Cycle-based token generation.
    Tokens(TokenGenerator),
    /// Continuous per-path PID estimation.
    Pid(PidEstimator),
}

impl RateController {
    /// Build the variant selected by `config.kind`.
    pub fn from_config(config: &RateConfig) -> Self {
        match config.kind {
            RateKind::Tokens => Self::Tokens(TokenGenerator::new(config.tokens.clone())),
            RateKind::Pid => Self::Pid(PidEstimator::new(config.pid.clone())),
        }
    }

    /// The configured variant.
    pub fn kind(&self) -> RateKind {
        match self {
            Self::Tokens(_) => RateKind::Tokens,
            Self::Pid(_) => RateKind::Pid,
        }
    }
}

// ── Gatherer ───────────────────────────────────────────────────────

/// Inbound paths of one consumer plus its rate controller.
#[derive(Clone, Debug)]
pub struct Gatherer {
    paths: IndexMap<PathId, InboundPath>,
    controller: RateController,
    tokens: TokenConfig,
    credit_cap: Option<u64>,
}

impl Gatherer {
    /// Create a gatherer with no paths.
    pub fn new(config: &RateConfig) -> Self {
        Self {
            paths: IndexMap::new(),
            controller: RateController::from_config(config),
            tokens: config.tokens.clone(),
            credit_cap: None,
        }
    }

    /// The rate controller.
    pub fn controller(&self) -> &RateController {
        &self.controller
    }

    /// All inbound paths in the order they were opened.
    pub fn paths(&self) -> impl Iterator<Item = &InboundPath> {
        self.paths.values()
    }

    /// One inbound path.
    pub fn path(&self, id: PathId) -> Option<&InboundPath> {
        self.paths.get(&id)
    }

    /// Number of open inbound paths.
    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    /// Credit currently held by all producers together.
    pub fn assigned_credit(&self) -> u64 {
        self.paths.values().map(|p| p.assigned_credit).sum()
    }

    /// Batch size currently requested from producers.
    pub fn batch_size_hint(&self) -> u64 {
        match &self.controller {
            RateController::Tokens(gen) => gen.batch_size_hint(),
            RateController::Pid(_) => self
                .tokens
                .initial_batch_size_hint
                .max(self.tokens.min_batch_size),
        }
    }

    /// Arm the first control cycle. Only the token variant uses timers.
    pub fn start(&mut self, now: Tick) -> FlowUpdate {
        match &mut self.controller {
            RateController::Tokens(gen) => {
                let update: FlowUpdate = gen.generate_tokens(now, &mut self.paths).into();
                self.capped(update)
            }
            RateController::Pid(_) => FlowUpdate::default(),
        }
    }

    /// Upper bound on the credit held by all producers together, if any.
    pub fn credit_cap(&self) -> Option<u64> {
        self.credit_cap
    }

    /// Bound the credit held by all producers together.
    ///
    /// Grants that would exceed the cap are cut down. The estimators keep
    /// their targets, and [`replenish`](Self::replenish) hands out the
    /// difference once the cap is raised. Credit already granted is never
    /// reclaimed.
    pub fn set_credit_cap(&mut self, cap: Option<u64>) {
        self.credit_cap = cap;
    }

    /// Accept a newly opened path and return its initial credit grant.
    ///
    /// Returns `None`, leaving the open path untouched, if `id` is
    /// already open.
    pub fn add_path(&mut self, id: PathId, from: EntityId) -> Option<CreditGrant> {
        if self.paths.contains_key(&id) {
            return None;
        }
        let mut path = InboundPath::new(id, from, self.batch_size_hint());
        path.target_credit = self.tokens.min_tokens;
        path.assigned_credit = self.tokens.min_tokens.min(self.room());
        let grant = CreditGrant {
            path: id,
            to: from,
            credit: path.assigned_credit,
            desired_batch_size: path.desired_batch_size,
        };
        debug!(path = %id, from = %from, credit = grant.credit, "path opened");
        self.paths.insert(id, path);
        Some(grant)
    }

    /// Top every path up toward its target within the credit cap.
    pub fn replenish(&mut self) -> FlowUpdate {
        let mut room = self.room();
        let mut update = FlowUpdate::default();
        for path in self.paths.values_mut() {
            let credit = path
                .target_credit
                .saturating_sub(path.assigned_credit)
                .min(room);
            if credit == 0 {
                continue;
            }
            room -= credit;
            path.assigned_credit += credit;
            update.grants.push(CreditGrant {
                path: path.id,
                to: path.from,
                credit,
                desired_batch_size: path.desired_batch_size,
            });
        }
        update
    }

    fn room(&self) -> u64 {
        self.credit_cap
            .map_or(u64::MAX, |cap| cap.saturating_sub(self.assigned_credit()))
    }

    /// Cut the grants of `update` down to the credit cap, newest first.
    fn capped(&mut self, mut update: FlowUpdate) -> FlowUpdate {
        let Some(cap) = self.credit_cap else {
            return update;
        };
        let mut excess = self.assigned_credit().saturating_sub(cap);
        for grant in update.grants.iter_mut().rev() {
            if excess == 0 {
                break;
            }
            let cut = grant.credit.min(excess);
            grant.credit -= cut;
            excess -= cut;
            if let Some(p) = self.paths.get_mut(&grant.path) {
                p.assigned_credit -= cut;
            }
        }
        let before = update.grants.len();
        update.grants.retain(|g| g.credit > 0);
        if update.grants.len() < before {
            trace!(cap, withheld = before - update.grants.len(), "grants held back");
        }
        update
    }

    /// Close a path, dropping its estimator state.
    pub fn remove_path(&mut self, id: PathId) -> Option<InboundPath> {
        if let RateController::Pid(pid) = &mut self.controller {
            pid.forget(id);
        }
        self.paths.shift_remove(&id)
    }

    /// Account for a batch arriving on `path`. Returns `false` for
    /// unknown paths.
    pub fn batch_received(&mut self, path: PathId, batch: BatchId, size: u64, now: Tick) -> bool {
        match self.paths.get_mut(&path) {
            Some(p) => {
                p.batch_received(batch, size, now);
                true
            }
            None => false,
        }
    }

    /// Feed a completed batch into the estimator.
    pub fn batch_completed(&mut self, report: BatchReport, now: Tick) -> FlowUpdate {
        let update = match &mut self.controller {
            RateController::Tokens(gen) => gen
                .batch_completed(
                    report.size,
                    report.started,
                    report.finished,
                    now,
                    &mut self.paths,
                )
                .map(FlowUpdate::from)
                .unwrap_or_default(),
            RateController::Pid(pid) => {
                let Some(path) = self.paths.get_mut(&report.path) else {
                    trace!(path = %report.path, "completion on closed path");
                    return FlowUpdate::default();
                };
                let rate = pid.update_rate(
                    report.path,
                    report.finished,
                    report.size,
                    report.processing_delay(),
                    report.scheduling_delay(),
                );
                let target = ((rate * self.tokens.cycle_duration.as_secs_f64()).round() as u64)
                    .max(self.tokens.min_batch_size);
                path.target_credit = target;
                let credit = target.saturating_sub(path.assigned_credit);
                let mut update = FlowUpdate::default();
                if credit > 0 {
                    path.assigned_credit += credit;
                    update.grants.push(CreditGrant {
                        path: path.id,
                        to: path.from,
                        credit,
                        desired_batch_size: path.desired_batch_size,
                    });
                }
                debug!(path = %report.path, rate, target, credit, "pid update");
                update
            }
        };
        self.capped(update)
    }

    /// Handle a fired cycle timer. Stale timers produce an empty update.
    pub fn cycle_timeout(&mut self, nr: u64, now: Tick) -> FlowUpdate {
        let update = match &mut self.controller {
            RateController::Tokens(gen) => gen
                .on_cycle_timeout(nr, now, &mut self.paths)
                .map(FlowUpdate::from)
                .unwrap_or_default(),
            RateController::Pid(_) => FlowUpdate::default(),
        };
        self.capped(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> RateConfig {
        RateConfig::default()
    }

    fn pid() -> RateConfig {
        RateConfig {
            kind: RateKind::Pid,
            ..RateConfig::default()
        }
    }

    fn report(path: u32, size: u64, enqueued: u64, started: u64, finished: u64) -> BatchReport {
        BatchReport {
            path: PathId(path),
            size,
            enqueued: Tick(enqueued),
            started: Tick(started),
            finished: Tick(finished),
        }
    }

    #[test]
    fn variant_follows_config() {
        assert_eq!(Gatherer::new(&tokens()).controller().kind(), RateKind::Tokens);
        assert_eq!(Gatherer::new(&pid()).controller().kind(), RateKind::Pid);
    }

    #[test]
    fn opening_a_path_grants_min_tokens() {
        let mut g = Gatherer::new(&tokens());
        let grant = g.add_path(PathId(3), EntityId(1));
        assert_eq!(
            grant,
            Some(CreditGrant {
                path: PathId(3),
                to: EntityId(1),
                credit: 100,
                desired_batch_size: 50,
            })
        );
        assert_eq!(g.assigned_credit(), 100);
    }

    #[test]
    fn duplicate_open_is_refused() {
        let mut g = Gatherer::new(&tokens());
        assert!(g.add_path(PathId(0), EntityId(1)).is_some());
        g.batch_received(PathId(0), BatchId(0), 30, Tick(4));
        assert_eq!(g.add_path(PathId(0), EntityId(1)), None);
        // The open path keeps its state.
        assert_eq!(g.path_count(), 1);
        assert_eq!(g.assigned_credit(), 70);
    }

    #[test]
    fn cap_limits_the_opening_grant() {
        let mut g = Gatherer::new(&tokens());
        g.set_credit_cap(Some(30));
        assert_eq!(g.add_path(PathId(0), EntityId(1)).unwrap().credit, 30);
        assert_eq!(g.add_path(PathId(1), EntityId(2)).unwrap().credit, 0);
        assert_eq!(g.assigned_credit(), 30);
    }

    #[test]
    fn held_back_credit_is_replenished_when_the_cap_rises() {
        let mut g = Gatherer::new(&pid());
        g.set_credit_cap(Some(0));
        assert_eq!(g.add_path(PathId(0), EntityId(1)).unwrap().credit, 0);
        assert!(g.replenish().is_empty());

        g.set_credit_cap(Some(60));
        let update = g.replenish();
        assert_eq!(update.grants.len(), 1);
        assert_eq!(update.grants[0].credit, 60);
        assert_eq!(g.path(PathId(0)).unwrap().target_credit, 100);

        g.set_credit_cap(None);
        assert_eq!(g.replenish().grants[0].credit, 40);
        assert!(g.replenish().is_empty());
    }

    #[test]
    fn capped_cycle_grants_are_cut_newest_first() {
        let mut g = Gatherer::new(&tokens());
        g.add_path(PathId(0), EntityId(1));
        g.add_path(PathId(1), EntityId(2));
        g.start(Tick(0));
        g.batch_received(PathId(0), BatchId(0), 100, Tick(10));
        g.batch_received(PathId(1), BatchId(0), 100, Tick(10));
        assert_eq!(g.assigned_credit(), 0);

        // 100 tokens over two paths, cut to 80 at the last path.
        g.set_credit_cap(Some(80));
        let update = g.cycle_timeout(1, Tick(100));
        let credits: Vec<_> = update.grants.iter().map(|g| g.credit).collect();
        assert_eq!(credits, vec![50, 30]);
        assert_eq!(g.assigned_credit(), 80);
        assert_eq!(g.path(PathId(1)).unwrap().target_credit, 50);
    }

    #[test]
    fn token_start_arms_first_timer() {
        let mut g = Gatherer::new(&tokens());
        g.add_path(PathId(0), EntityId(1));
        let update = g.start(Tick(0));
        assert_eq!(update.timer, Some(CycleTimer { nr: 1, at: Tick(100) }));
        assert_eq!(update.tokens, Some(100));
        // Path already holds its full share.
        assert!(update.grants.is_empty());
    }

    #[test]
    fn received_batches_free_credit_for_the_next_cycle() {
        let mut g = Gatherer::new(&tokens());
        g.add_path(PathId(0), EntityId(1));
        g.start(Tick(0));
        assert!(g.batch_received(PathId(0), BatchId(0), 40, Tick(10)));
        assert!(!g.batch_received(PathId(9), BatchId(0), 40, Tick(10)));
        assert_eq!(g.assigned_credit(), 60);
        let update = g.cycle_timeout(1, Tick(100));
        assert_eq!(update.grants.len(), 1);
        assert_eq!(update.grants[0].credit, 40);
        assert_eq!(g.cycle_timeout(1, Tick(150)), FlowUpdate::default());
    }

    #[test]
    fn pid_tops_up_after_each_batch() {
        let mut g = Gatherer::new(&pid());
        g.add_path(PathId(0), EntityId(1));
        assert!(g.start(Tick(0)).is_empty());
        g.batch_received(PathId(0), BatchId(0), 100, Tick(5));
        assert_eq!(g.assigned_credit(), 0);
        // 100 items in 1000 ticks = 100_000/s; over a 100 tick cycle = 10.
        let update = g.batch_completed(report(0, 100, 5, 10, 1010), Tick(1010));
        assert_eq!(update.grants.len(), 1);
        assert_eq!(update.grants[0].credit, 10);
        assert!(update.timer.is_none());
    }

    #[test]
    fn pid_credit_never_below_min_batch_size() {
        let mut g = Gatherer::new(&pid());
        g.add_path(PathId(0), EntityId(1));
        g.batch_received(PathId(0), BatchId(0), 100, Tick(5));
        // One item per second: the floor of 100/s still rounds to zero.
        let update = g.batch_completed(report(0, 1, 5, 10, 1_000_010), Tick(1_000_010));
        assert_eq!(update.grants[0].credit, 5);
    }

    #[test]
    fn closed_path_reports_are_ignored() {
        let mut g = Gatherer::new(&pid());
        g.add_path(PathId(0), EntityId(1));
        assert!(g.remove_path(PathId(0)).is_some());
        assert!(g
            .batch_completed(report(0, 10, 0, 0, 10), Tick(10))
            .is_empty());
    }
}
