//! Driver-side entity: control state machine, mailbox and flow state.
//!
//! ```text
//!            mailbox non-empty            start of tick
//!   Idle ─────────────────────▶ ReadMailbox ─────────▶ Idle + step actor
//!    ▲                                                    │ yielded
//!    │ step finished                                      ▼
//!    └──────────────────────────── ConsumeBatch / ProduceBatch
//!                                     (resume once per tick)
//! ```
//!
//! Everything here runs on the driving thread. The actor is the only part
//! that ever leaves it, and only for the duration of one step.

use tickflow_core::{EntityId, EntityKind, EntityState, PathId, ProtocolViolation};
use tickflow_flow::{BatchReport, FlowUpdate, Gatherer, Scatterer};
use tracing::{trace, warn};

use crate::actor::{Actor, Envelope, Mailbox};
use crate::environment::Core;
use crate::ledger::MessageLedger;
use crate::protocol::Message;
use crate::scheduler::Delay;
use crate::step::{BatchProgress, FlowSnapshot, StepController, StepOutcome};

/// Read model of one entity, for presentation layers.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityView {
    /// Entity id.
    pub id: EntityId,
    /// Unique name.
    pub name: String,
    /// Role.
    pub kind: EntityKind,
    /// Control state.
    pub state: EntityState,
    /// Whether the actor has processed at least one message.
    pub started: bool,
    /// Messages waiting in the mailbox.
    pub mailbox_size: usize,
    /// One rendered line per waiting message.
    pub mailbox: Vec<String>,
    /// Outbound credit (producers).
    pub credit: u64,
    /// Produced items waiting for credit (producers).
    pub buffered: u64,
    /// Credit held by upstream producers (consumers).
    pub assigned_credit: u64,
    /// Batch size requested from upstream (consumers).
    pub batch_size_hint: u64,
    /// Progress through the current or last batch.
    pub progress: BatchProgress,
    /// Mean message latency in ticks.
    pub average_latency: u64,
    /// Ticks counted as idling.
    pub idle_ticks: u64,
}

/// A pipeline participant as seen by the tick scheduler.
#[derive(Debug)]
pub struct Entity {
    pub(crate) id: EntityId,
    pub(crate) name: String,
    pub(crate) kind: EntityKind,
    pub(crate) state: EntityState,
    last_state: EntityState,
    pub(crate) started: bool,
    pub(crate) mailbox: Mailbox,
    actor: Option<Actor>,
    controller: StepController,
    pub(crate) gatherer: Option<Gatherer>,
    pub(crate) scatterer: Option<Scatterer>,
    downstream: Vec<(PathId, EntityId)>,
    pub(crate) progress: BatchProgress,
    pub(crate) idle_ticks: u64,
    pub(crate) last_idle_percentage: Option<f64>,
}

impl Entity {
    pub(crate) fn new(
        id: EntityId,
        name: String,
        actor: Actor,
        gatherer: Option<Gatherer>,
        scatterer: Option<Scatterer>,
    ) -> Self {
        Self {
            id,
            name,
            kind: actor.kind(),
            state: EntityState::Idle,
            last_state: EntityState::Idle,
            started: false,
            mailbox: Mailbox::new(),
            actor: Some(actor),
            controller: StepController::new(id),
            gatherer,
            scatterer,
            downstream: Vec::new(),
            progress: BatchProgress::default(),
            idle_ticks: 0,
            last_idle_percentage: None,
        }
    }

    /// Entity id.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Control state.
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Whether the actor has processed at least one message.
    pub fn started(&self) -> bool {
        self.started
    }

    /// The mailbox.
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Consumer-side flow control, for sinks and stages.
    pub fn gatherer(&self) -> Option<&Gatherer> {
        self.gatherer.as_ref()
    }

    /// Producer-side flow control, for sources and stages.
    pub fn scatterer(&self) -> Option<&Scatterer> {
        self.scatterer.as_ref()
    }

    /// Step controller of this entity.
    pub fn controller(&self) -> &StepController {
        &self.controller
    }

    /// Ticks counted as idling.
    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks
    }

    /// Progress through the current or last batch.
    pub fn progress(&self) -> BatchProgress {
        self.progress
    }

    /// Messages fully processed by the actor. Reports the count as of the
    /// last finished step while a step is in progress.
    pub fn processed(&self) -> Option<u64> {
        self.actor.as_ref().map(Actor::processed)
    }

    pub(crate) fn add_downstream(&mut self, path: PathId, to: EntityId) {
        self.downstream.push((path, to));
        if let Some(s) = self.scatterer.as_mut() {
            s.add_path(path, to);
        }
    }

    pub(crate) fn flow_snapshot(&self) -> FlowSnapshot {
        self.scatterer
            .as_ref()
            .map_or_else(FlowSnapshot::default, |s| FlowSnapshot {
                credit: s.credit(),
                buffered: s.buffered(),
                headroom: s.headroom(),
                max_batch_size: s.max_batch_size(),
            })
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Open outbound paths and arm the first control cycle.
    pub(crate) fn start(&mut self, core: &mut Core) {
        for &(path, to) in &self.downstream {
            core.transmit(self.id, to, Message::Open { path });
        }
        self.sync_credit_cap();
        if let Some(g) = self.gatherer.as_mut() {
            let update = g.start(core.now);
            self.apply_flow_update(core, update);
        }
    }

    /// Abort a step in progress and close the mailbox. Dropped mail is
    /// removed from `ledger`.
    pub(crate) fn teardown(&mut self, ledger: &mut MessageLedger) -> bool {
        let aborted = match self.controller.abort() {
            Some(actor) => {
                self.actor = Some(actor);
                true
            }
            None => false,
        };
        let dropped = self.mailbox.close();
        for envelope in &dropped {
            ledger.discard(self.id, envelope.id);
        }
        if !dropped.is_empty() {
            trace!(entity = %self.id, dropped = dropped.len(), "mail dropped on close");
        }
        self.state = EntityState::Idle;
        aborted
    }

    // ── Tick phases ──────────────────────────────────────────────

    pub(crate) fn before_tick(&mut self, core: &mut Core) {
        if self.state != EntityState::Idle || self.controller.is_active() {
            return;
        }
        if self.mailbox.has_items() {
            self.state = EntityState::ReadMailbox;
        } else if self.started && self.last_state == EntityState::Idle {
            self.idle_ticks += 1;
            let (id, now) = (self.id, core.now);
            core.post(
                Delay::Now,
                Box::new(move |env, _| env.core.notify(|o| o.idling(id, now))),
            );
        }
    }

    /// Returns whether the actor was stepped.
    pub(crate) fn tick(&mut self, core: &mut Core) -> bool {
        match self.state {
            EntityState::ReadMailbox => {
                self.state = EntityState::Idle;
                self.step_next_message(core)
            }
            EntityState::ConsumeBatch | EntityState::ProduceBatch => {
                let outcome = self.controller.resume(core.now, self.flow_snapshot());
                self.absorb(core, outcome);
                true
            }
            EntityState::Idle => false,
        }
    }

    pub(crate) fn after_tick(&mut self) {
        self.last_state = self.state;
    }

    /// Periodic hook; sources with spare credit ask themselves to generate.
    pub(crate) fn tock(&mut self, core: &mut Core) {
        if self.kind != EntityKind::Source {
            return;
        }
        let headroom = self.scatterer.as_ref().map_or(0, Scatterer::headroom);
        let queued = self
            .mailbox
            .iter()
            .any(|e| matches!(e.message, Message::Generate));
        if headroom > 0 && !queued && !self.controller.is_active() {
            core.transmit(self.id, self.id, Message::Generate);
        }
    }

    // ── Stepping ─────────────────────────────────────────────────

    fn step_next_message(&mut self, core: &mut Core) -> bool {
        assert!(
            !self.controller.is_active(),
            "entity {}: mailbox read while a step is in progress",
            self.id
        );
        let Some(envelope) = self.mailbox.pop() else {
            return false;
        };
        core.consume(self.id, envelope.id);
        self.accept(core, &envelope);
        let Some(actor) = self.actor.take() else {
            panic!("entity {}: actor missing outside a step", self.id);
        };
        let outcome = self
            .controller
            .begin(actor, envelope, core.now, self.flow_snapshot());
        self.started = true;
        self.absorb(core, outcome);
        true
    }

    fn absorb(&mut self, core: &mut Core, outcome: StepOutcome) {
        let report = match outcome {
            StepOutcome::Yielded(report) => {
                self.state = report.progress.state;
                report
            }
            StepOutcome::Finished { report, actor } => {
                self.actor = Some(actor);
                self.state = EntityState::Idle;
                report
            }
        };
        self.progress = report.progress;
        if !report.effects.is_empty() {
            let id = self.id;
            let effects = report.effects;
            core.post(
                Delay::Now,
                Box::new(move |env, _| env.apply_effects(id, effects)),
            );
        }
    }

    // ── Flow control ─────────────────────────────────────────────

    /// Stream bookkeeping for a message leaving the mailbox.
    fn accept(&mut self, core: &mut Core, envelope: &Envelope) {
        let now = core.now;
        match envelope.message {
            Message::Open { path } => {
                let Some(from) = envelope.from.filter(|_| self.gatherer.is_some()) else {
                    warn!(entity = %self.id, path = %path, "open on a non-consumer");
                    return;
                };
                self.sync_credit_cap();
                let grant = self.gatherer.as_mut().and_then(|g| g.add_path(path, from));
                let Some(grant) = grant else {
                    core.violation(ProtocolViolation::DuplicateOpen {
                        receiver: self.id,
                        path,
                    });
                    return;
                };
                core.transmit(
                    self.id,
                    grant.to,
                    Message::AckOpen {
                        path,
                        initial_credit: grant.credit,
                        desired_batch_size: grant.desired_batch_size,
                    },
                );
            }
            Message::AckOpen {
                path,
                initial_credit: credit,
                desired_batch_size,
            }
            | Message::AckBatch {
                path,
                new_credit: credit,
                desired_batch_size,
                ..
            } => {
                let known = self
                    .scatterer
                    .as_mut()
                    .is_some_and(|s| s.grant(path, credit, Some(desired_batch_size)));
                if !known {
                    warn!(entity = %self.id, path = %path, "credit for an unknown path");
                    return;
                }
                self.emit(core);
                self.replenish(core);
            }
            Message::Batch { path, id, size, .. } => {
                let known = self
                    .gatherer
                    .as_mut()
                    .is_some_and(|g| g.batch_received(path, id, size, now));
                if !known {
                    warn!(entity = %self.id, path = %path, batch = %id, "batch on an unknown path");
                }
            }
            Message::CycleTimeout { nr } => {
                self.sync_credit_cap();
                if let Some(g) = self.gatherer.as_mut() {
                    let update = g.cycle_timeout(nr, now);
                    self.apply_flow_update(core, update);
                }
            }
            Message::Generate | Message::Custom(_) => {}
        }
    }

    /// Bound upstream credit by what this entity may still emit. Only
    /// entities that both consume and produce are capped.
    fn sync_credit_cap(&mut self) {
        if let (Some(g), Some(s)) = (self.gatherer.as_mut(), self.scatterer.as_ref()) {
            g.set_credit_cap(Some(s.headroom()));
        }
    }

    /// Hand out upstream credit held back while downstream was short.
    fn replenish(&mut self, core: &mut Core) {
        self.sync_credit_cap();
        if let Some(g) = self.gatherer.as_mut() {
            let update = g.replenish();
            if !update.is_empty() {
                self.apply_flow_update(core, update);
            }
        }
    }

    /// Feed a finished batch into the rate estimator.
    pub(crate) fn batch_completed(&mut self, core: &mut Core, report: BatchReport) {
        self.sync_credit_cap();
        if let Some(g) = self.gatherer.as_mut() {
            let update = g.batch_completed(report, core.now);
            self.apply_flow_update(core, update);
        }
    }

    /// Send credit upstream and arm the next cycle timer.
    pub(crate) fn apply_flow_update(&mut self, core: &mut Core, update: FlowUpdate) {
        for grant in update.grants {
            let acknowledged_id = self
                .gatherer
                .as_ref()
                .and_then(|g| g.path(grant.path))
                .and_then(|p| p.last_batch_id);
            core.transmit(
                self.id,
                grant.to,
                Message::AckBatch {
                    path: grant.path,
                    acknowledged_id,
                    new_credit: grant.credit,
                    desired_batch_size: grant.desired_batch_size,
                },
            );
        }
        if let Some(timer) = update.timer {
            let id = self.id;
            core.post_at(
                timer.at,
                Box::new(move |env, _| {
                    env.deliver(None, id, Message::CycleTimeout { nr: timer.nr });
                }),
            );
        }
        if let Some(tokens) = update.tokens {
            trace!(entity = %self.id, tokens, "control cycle closed");
        }
    }

    /// Buffer produced items and emit whatever the credit allows.
    pub(crate) fn produced(&mut self, core: &mut Core, items: u64) {
        match self.scatterer.as_mut() {
            Some(s) => s.push(items),
            None => {
                warn!(entity = %self.id, items, "items produced by a non-producer");
                return;
            }
        }
        self.emit(core);
    }

    fn emit(&mut self, core: &mut Core) {
        let Some(s) = self.scatterer.as_mut() else {
            return;
        };
        let now = core.now;
        for batch in s.emit_batches(now, true) {
            core.transmit(
                self.id,
                batch.to,
                Message::Batch {
                    path: batch.path,
                    id: batch.id,
                    size: batch.size,
                    enqueued: now,
                },
            );
        }
    }
}
