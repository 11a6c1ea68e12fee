//! Cooperative step controller.
//!
//! Lets the single-threaded tick loop advance an actor by exactly one
//! logical unit of work per call, even though the actor's message handler
//! is an ordinary blocking function that may pause mid-message.
//!
//! # Handoff
//!
//! Each step runs on a short-lived worker thread that owns the [`Actor`]
//! for the duration of the step. Driver and worker talk over two
//! zero-capacity channels, so every exchange is a rendezvous:
//!
//! ```text
//! driver                                   worker
//!   |-- spawn(actor, envelope) ------------->|
//!   |-- Resume(now) ------------------------>| handle(envelope) ...
//!   |<------------------------ Yielded ------| yield_now() blocks
//!   |   (one tick later)                     |
//!   |-- Resume(now) ------------------------>| ... continues
//!   |<----------------------- Finished ------| returns Actor
//!   |-- join() ----------------------------->X
//! ```
//!
//! The driver never issues a second `Resume` before it has received the
//! reply to the first, and the worker never runs while the driver is
//! between replies. Teardown sends `Abort` to a worker parked in
//! `yield_now`; the yield returns [`Cancelled`], the handler unwinds with
//! `?`, and the worker hands the actor back through its `JoinHandle`.
//!
//! Broken handoffs (a second step while a worker is active, a worker that
//! dies mid-step, yielding outside a batch) panic: once the alternation
//! is broken no shared state can be trusted.

use std::mem;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tickflow_core::{Cancelled, EntityId, EntityState, Tick};
use tickflow_flow::BatchReport;
use tracing::{debug, trace};

use crate::actor::{Actor, Envelope};
use crate::protocol::Message;

// ── Shared types ───────────────────────────────────────────────────

/// Driver-side view of the handoff.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HandoffState {
    /// No step in progress.
    #[default]
    None,
    /// A resume was sent; the driver is waiting for the reply.
    ResumeRequested,
    /// The worker is parked at a yield point.
    Yielded,
    /// The worker completed its step and is being joined.
    Finalize,
    /// The step is being cancelled.
    Abort,
}

/// Producer-side flow state, copied into the worker on every resume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlowSnapshot {
    /// Smallest open credit across outbound paths.
    pub credit: u64,
    /// Items produced but not yet emitted.
    pub buffered: u64,
    /// Items that may be produced without overrunning the credit.
    pub headroom: u64,
    /// Largest batch the entity emits.
    pub max_batch_size: u64,
}

/// Progress through the current batch, for read models.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchProgress {
    /// `ConsumeBatch` or `ProduceBatch` while a batch runs, `Idle` otherwise.
    pub state: EntityState,
    /// Ticks spent on the current item.
    pub item_progress: u64,
    /// Ticks each item takes.
    pub ticks_per_item: u64,
    /// Items completed in the current batch.
    pub batch_progress: u64,
    /// Items in the current batch.
    pub batch_size: u64,
}

/// A change requested by a behavior, applied later on the driving thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Transmit a message.
    Send {
        /// Receiver.
        to: EntityId,
        /// Payload.
        message: Message,
    },
    /// An inbound batch has been fully processed.
    BatchCompleted(BatchReport),
    /// New items are ready to be emitted downstream.
    Produced {
        /// Number of items.
        items: u64,
    },
}

/// What the worker hands back with each reply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Effects requested since the previous reply.
    pub effects: Vec<Effect>,
    /// Batch progress at the time of the reply.
    pub progress: BatchProgress,
}

enum StepCommand {
    Resume { now: Tick, flow: FlowSnapshot },
    Abort,
}

enum StepReply {
    Yielded(StepReport),
    Finished(StepReport),
}

// ── StepContext ────────────────────────────────────────────────────

/// Worker-side handle passed to [`Behavior::handle`](crate::Behavior::handle).
pub struct StepContext {
    me: EntityId,
    now: Tick,
    flow: FlowSnapshot,
    commands: Receiver<StepCommand>,
    replies: Sender<StepReply>,
    effects: Vec<Effect>,
    progress: BatchProgress,
    aborted: bool,
}

impl StepContext {
    /// The entity this step belongs to.
    pub fn me(&self) -> EntityId {
        self.me
    }

    /// Tick of the most recent resume.
    pub fn now(&self) -> Tick {
        self.now
    }

    /// Producer-side flow state as of the most recent resume.
    pub fn flow(&self) -> &FlowSnapshot {
        &self.flow
    }

    /// Current batch progress.
    pub fn progress(&self) -> &BatchProgress {
        &self.progress
    }

    /// Transmit `message` to `to` once this step reports back.
    pub fn send(&mut self, to: EntityId, message: Message) {
        self.effects.push(Effect::Send { to, message });
    }

    /// Report a fully processed inbound batch to the rate estimator.
    pub fn report_batch(&mut self, report: BatchReport) {
        self.effects.push(Effect::BatchCompleted(report));
    }

    /// Hand `items` new items to the outbound side.
    pub fn produce(&mut self, items: u64) {
        if items > 0 {
            self.effects.push(Effect::Produced { items });
        }
    }

    /// Enter a multi-tick batch of `items` items, `ticks_per_item` each.
    ///
    /// # Panics
    ///
    /// Panics if `state` is not a batch state or a batch is already open.
    pub fn begin_batch(&mut self, state: EntityState, items: u64, ticks_per_item: u64) {
        assert!(
            state.is_mid_batch(),
            "entity {}: begin_batch with non-batch state {state}",
            self.me
        );
        assert!(
            !self.progress.state.is_mid_batch(),
            "entity {}: batch opened while already in {}",
            self.me,
            self.progress.state
        );
        self.progress = BatchProgress {
            state,
            item_progress: 0,
            ticks_per_item,
            batch_progress: 0,
            batch_size: items,
        };
    }

    /// Spend `ticks_per_item` ticks on the next item of the open batch,
    /// yielding once per tick.
    pub fn process_item(&mut self) -> Result<(), Cancelled> {
        for _ in 0..self.progress.ticks_per_item {
            self.progress.item_progress += 1;
            self.yield_now()?;
        }
        self.progress.item_progress = 0;
        self.progress.batch_progress += 1;
        Ok(())
    }

    /// Close the open batch. Counters stay visible until the next batch.
    pub fn end_batch(&mut self) {
        self.progress.state = EntityState::Idle;
    }

    /// Suspend until the driver resumes this step on a later tick.
    ///
    /// Returns [`Cancelled`] if the step was aborted meanwhile.
    ///
    /// # Panics
    ///
    /// Panics outside a batch: the driver only resumes mid-batch entities.
    pub fn yield_now(&mut self) -> Result<(), Cancelled> {
        if self.aborted {
            return Err(Cancelled);
        }
        assert!(
            self.progress.state.is_mid_batch(),
            "entity {}: yield outside a batch",
            self.me
        );
        let report = self.take_report();
        if self.replies.send(StepReply::Yielded(report)).is_err() {
            self.aborted = true;
            return Err(Cancelled);
        }
        match self.commands.recv() {
            Ok(StepCommand::Resume { now, flow }) => {
                self.now = now;
                self.flow = flow;
                Ok(())
            }
            Ok(StepCommand::Abort) | Err(_) => {
                self.aborted = true;
                Err(Cancelled)
            }
        }
    }

    fn take_report(&mut self) -> StepReport {
        StepReport {
            effects: mem::take(&mut self.effects),
            progress: self.progress,
        }
    }
}

fn run_worker(
    me: EntityId,
    mut actor: Actor,
    envelope: Envelope,
    commands: Receiver<StepCommand>,
    replies: Sender<StepReply>,
) -> Actor {
    let (now, flow) = match commands.recv() {
        Ok(StepCommand::Resume { now, flow }) => (now, flow),
        Ok(StepCommand::Abort) | Err(_) => return actor,
    };
    let mut ctx = StepContext {
        me,
        now,
        flow,
        commands,
        replies,
        effects: Vec::new(),
        progress: BatchProgress::default(),
        aborted: false,
    };
    let result = actor.process(&mut ctx, &envelope);
    if ctx.aborted {
        trace!(entity = %me, message = %envelope.id, "step unwound after abort");
        return actor;
    }
    if result.is_err() {
        debug!(entity = %me, "behavior returned Cancelled without an abort");
    }
    ctx.progress.state = EntityState::Idle;
    let report = ctx.take_report();
    let _ = ctx.replies.send(StepReply::Finished(report));
    actor
}

// ── StepController ─────────────────────────────────────────────────

/// Result of driving one step forward.
#[derive(Debug)]
pub enum StepOutcome {
    /// The actor paused mid-batch; resume it on the next tick.
    Yielded(StepReport),
    /// The message is fully handled and the worker has been joined.
    Finished {
        /// Effects and final progress.
        report: StepReport,
        /// The actor, handed back by the worker.
        actor: Actor,
    },
}

struct Worker {
    commands: Sender<StepCommand>,
    replies: Receiver<StepReply>,
    handle: JoinHandle<Actor>,
}

/// Per-entity driver of step workers. At most one worker exists at a time.
pub struct StepController {
    entity: EntityId,
    state: HandoffState,
    worker: Option<Worker>,
    spawned: u64,
    joined: u64,
    aborted: u64,
}

impl std::fmt::Debug for StepController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepController")
            .field("entity", &self.entity)
            .field("state", &self.state)
            .field("active", &self.worker.is_some())
            .finish()
    }
}

impl StepController {
    /// A controller with no worker.
    pub fn new(entity: EntityId) -> Self {
        Self {
            entity,
            state: HandoffState::None,
            worker: None,
            spawned: 0,
            joined: 0,
            aborted: 0,
        }
    }

    /// Current handoff state.
    pub fn state(&self) -> HandoffState {
        self.state
    }

    /// Whether a worker is parked mid-step.
    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    /// Workers spawned so far.
    pub fn spawned(&self) -> u64 {
        self.spawned
    }

    /// Workers joined so far, aborted ones included.
    pub fn joined(&self) -> u64 {
        self.joined
    }

    /// Steps cancelled by [`abort`](Self::abort).
    pub fn aborted(&self) -> u64 {
        self.aborted
    }

    /// Start a step: move `actor` onto a fresh worker and run it until its
    /// first yield or completion.
    ///
    /// # Panics
    ///
    /// Panics if a step is already in progress.
    pub fn begin(
        &mut self,
        actor: Actor,
        envelope: Envelope,
        now: Tick,
        flow: FlowSnapshot,
    ) -> StepOutcome {
        assert!(
            self.worker.is_none() && self.state == HandoffState::None,
            "entity {}: step requested while a worker is still active ({:?})",
            self.entity,
            self.state
        );
        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded(0);
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(0);
        let me = self.entity;
        let handle = thread::Builder::new()
            .name(format!("tickflow-step-{me}"))
            .spawn(move || run_worker(me, actor, envelope, cmd_rx, reply_tx))
            .expect("failed to spawn step worker");
        self.spawned += 1;
        debug!(entity = %me, "step worker spawned");
        self.worker = Some(Worker {
            commands: cmd_tx,
            replies: reply_rx,
            handle,
        });
        self.resume(now, flow)
    }

    /// Advance a parked step by one yield.
    ///
    /// # Panics
    ///
    /// Panics without an active step, on a second resume before the first
    /// was answered, or if the worker died.
    pub fn resume(&mut self, now: Tick, flow: FlowSnapshot) -> StepOutcome {
        assert!(
            self.state != HandoffState::ResumeRequested,
            "entity {}: resume issued while the previous one is in flight",
            self.entity
        );
        let Some(worker) = self.worker.as_ref() else {
            panic!("entity {}: resume without an active step", self.entity);
        };
        self.state = HandoffState::ResumeRequested;
        let reply = match worker.commands.send(StepCommand::Resume { now, flow }) {
            Ok(()) => worker.replies.recv().ok(),
            Err(_) => None,
        };
        match reply {
            Some(StepReply::Yielded(report)) => {
                self.state = HandoffState::Yielded;
                StepOutcome::Yielded(report)
            }
            Some(StepReply::Finished(report)) => {
                self.state = HandoffState::Finalize;
                let actor = self.join();
                self.state = HandoffState::None;
                StepOutcome::Finished { report, actor }
            }
            None => self.worker_died(),
        }
    }

    /// Cancel a parked step and return the actor. No-op without a worker.
    pub fn abort(&mut self) -> Option<Actor> {
        let worker = self.worker.take()?;
        self.state = HandoffState::Abort;
        // The worker is parked in `yield_now`, waiting for this command.
        let _ = worker.commands.send(StepCommand::Abort);
        drop(worker.commands);
        drop(worker.replies);
        let actor = match worker.handle.join() {
            Ok(actor) => actor,
            Err(_) => panic!("entity {}: step worker panicked during abort", self.entity),
        };
        self.joined += 1;
        self.aborted += 1;
        self.state = HandoffState::None;
        debug!(entity = %self.entity, "step aborted");
        Some(actor)
    }

    fn join(&mut self) -> Actor {
        let Some(worker) = self.worker.take() else {
            panic!("entity {}: join without a worker", self.entity);
        };
        drop(worker.commands);
        drop(worker.replies);
        match worker.handle.join() {
            Ok(actor) => {
                self.joined += 1;
                debug!(entity = %self.entity, "step worker joined");
                actor
            }
            Err(_) => panic!("entity {}: step worker panicked", self.entity),
        }
    }

    fn worker_died(&mut self) -> ! {
        let entity = self.entity;
        if let Some(worker) = self.worker.take() {
            drop(worker.commands);
            drop(worker.replies);
            let _ = worker.handle.join();
        }
        panic!("entity {entity}: step worker terminated without finishing its step");
    }
}

impl Drop for StepController {
    fn drop(&mut self) {
        if !thread::panicking() {
            self.abort();
        }
    }
}
