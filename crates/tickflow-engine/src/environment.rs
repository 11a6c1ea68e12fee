//! The simulation environment: clock, entities, event queue and ledger.
//!
//! One call to [`Environment::tick`] advances the simulated clock by one
//! tick and runs every phase to completion on the calling thread:
//!
//! 1. `before_tick` on every entity (Idle entities with mail switch to
//!    ReadMailbox; started, idle, empty entities count an idling tick)
//! 2. `tick` on every entity (read a message or resume a parked batch)
//! 3. `after_tick` on every entity
//! 4. `tock` on every entity, every `ticks_per_interval` ticks
//! 5. flush of every due event, including events posted by the flush
//! 6. idle statistics and `tick_completed` for observers
//!
//! Entities are visited in creation order in every phase.

use std::time::Instant;

use indexmap::IndexMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tickflow_core::{
    EntityId, EntityKind, MessageId, PathId, ProtocolViolation, Tick, TickDuration,
};
use tickflow_flow::{Gatherer, Scatterer};
use tracing::{debug, info, trace, warn};

use crate::actor::{Actor, Behavior};
use crate::behaviors::{SinkBehavior, SourceBehavior, StageBehavior};
use crate::config::{SimConfig, SinkConfig, SourceConfig, StageConfig};
use crate::entity::{Entity, EntityView};
use crate::error::SimError;
use crate::ledger::MessageLedger;
use crate::metrics::TickMetrics;
use crate::observer::Observer;
use crate::protocol::Message;
use crate::scheduler::{Delay, Event, EventQueue};
use crate::step::Effect;

/// Idle percentage as published to observers: the elapsed simulated time
/// divided by the idle tick count, times 100. Zero before the first idle
/// tick. The ratio is inverted with respect to a conventional "share of
/// time spent idle" and is kept that way for compatibility with existing
/// dashboards.
pub fn idle_percentage(now: Tick, idle_ticks: u64) -> f64 {
    if idle_ticks == 0 {
        0.0
    } else {
        now.0 as f64 / idle_ticks as f64 * 100.0
    }
}

// ── Core ───────────────────────────────────────────────────────────

/// Everything in the environment except the entities, so entity methods
/// can borrow both at once.
pub(crate) struct Core {
    pub(crate) now: Tick,
    config: SimConfig,
    rng: ChaCha8Rng,
    queue: EventQueue,
    pub(crate) ledger: MessageLedger,
    observers: Vec<Box<dyn Observer>>,
    pub(crate) metrics: TickMetrics,
    violations: Vec<ProtocolViolation>,
    last_global_idle: Option<f64>,
}

impl Core {
    fn new(config: SimConfig) -> Self {
        Self {
            now: Tick::ZERO,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            queue: EventQueue::new(),
            ledger: MessageLedger::new(),
            observers: Vec::new(),
            metrics: TickMetrics::default(),
            violations: Vec::new(),
            last_global_idle: None,
        }
    }

    /// Resolve a delay to an absolute tick.
    fn target(&mut self, delay: Delay) -> Tick {
        match delay {
            Delay::Now => self.now,
            Delay::Ticks(n) => self.now + TickDuration(n),
            Delay::Random => {
                let (min, max) = (self.config.min_delay.0, self.config.max_delay.0);
                self.now + TickDuration(self.rng.random_range(min..=max))
            }
        }
    }

    pub(crate) fn post(&mut self, delay: Delay, event: Event) {
        let at = self.target(delay);
        self.queue.push(at, event);
    }

    pub(crate) fn post_at(&mut self, at: Tick, event: Event) {
        self.queue.push(at, event);
    }

    /// Route `message` from `from` to `to`. Messages to self skip the
    /// simulated network.
    pub(crate) fn transmit(&mut self, from: EntityId, to: EntityId, message: Message) {
        let delay = if from == to { Delay::Now } else { Delay::Random };
        trace!(from = %from, to = %to, message = %message, "transmit");
        self.post(
            delay,
            Box::new(move |env, _| {
                env.deliver(Some(from), to, message);
            }),
        );
    }

    /// Ledger and observer bookkeeping for a message leaving a mailbox.
    pub(crate) fn consume(&mut self, entity: EntityId, id: MessageId) {
        match self.ledger.deregister(entity, id, self.now) {
            Ok(latency) => {
                trace!(entity = %entity, message = %id, latency = %latency, "message consumed");
                self.post(
                    Delay::Now,
                    Box::new(move |env, _| {
                        let core = &mut env.core;
                        let average = core.ledger.average_latency(entity);
                        let global = core.ledger.average_global_latency();
                        core.notify(|o| {
                            o.message_consumed(entity, id);
                            o.latency_changed(entity, average);
                            o.global_latency_changed(global);
                        });
                    }),
                );
            }
            Err(e) => self.violation(e),
        }
    }

    pub(crate) fn violation(&mut self, error: impl Into<ProtocolViolation>) {
        let error = error.into();
        warn!(error = %error, "protocol violation");
        self.metrics.current.protocol_violations += 1;
        self.violations.push(error);
    }

    pub(crate) fn notify(&mut self, mut f: impl FnMut(&mut dyn Observer)) {
        for observer in &mut self.observers {
            f(observer.as_mut());
        }
    }
}

// ── Environment ────────────────────────────────────────────────────

/// A tick-synchronized actor simulation.
///
/// Build the topology with [`add_source`](Self::add_source),
/// [`add_sink`](Self::add_sink), [`add_stage`](Self::add_stage) and
/// [`connect`](Self::connect), then drive it with [`tick`](Self::tick)
/// or [`manual_tick`](Self::manual_tick). Topology is frozen once the
/// first tick has run.
pub struct Environment {
    pub(crate) core: Core,
    entities: Vec<Entity>,
    names: IndexMap<String, EntityId>,
    next_path: u32,
    started: bool,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("now", &self.core.now)
            .field("entities", &self.entities.len())
            .field("pending_events", &self.core.queue.len())
            .field("started", &self.started)
            .finish()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::from_valid(SimConfig::default())
    }
}

impl Environment {
    /// Validate `config` and create an empty environment.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: SimConfig) -> Self {
        Self {
            core: Core::new(config),
            entities: Vec::new(),
            names: IndexMap::new(),
            next_path: 0,
            started: false,
        }
    }

    // ── Topology ─────────────────────────────────────────────────

    /// Add a source that generates items whenever it has credit.
    pub fn add_source(&mut self, name: &str, config: SourceConfig) -> Result<EntityId, SimError> {
        config.validate()?;
        let max_batch_size = config.max_batch_size;
        self.insert(name, Box::new(SourceBehavior::new(config)), max_batch_size)
    }

    /// Add a sink that consumes batches.
    pub fn add_sink(&mut self, name: &str, config: SinkConfig) -> Result<EntityId, SimError> {
        self.insert(name, Box::new(SinkBehavior::new(config)), 0)
    }

    /// Add a stage that consumes batches and produces derived items.
    pub fn add_stage(&mut self, name: &str, config: StageConfig) -> Result<EntityId, SimError> {
        config.validate()?;
        let max_batch_size = config.max_batch_size;
        self.insert(name, Box::new(StageBehavior::new(config)), max_batch_size)
    }

    /// Add an entity with a custom behavior. Producers emit batches of at
    /// most the default source batch size.
    pub fn add_entity(
        &mut self,
        name: &str,
        behavior: Box<dyn Behavior>,
    ) -> Result<EntityId, SimError> {
        let max_batch_size = SourceConfig::default().max_batch_size;
        self.insert(name, behavior, max_batch_size)
    }

    fn insert(
        &mut self,
        name: &str,
        behavior: Box<dyn Behavior>,
        max_batch_size: u64,
    ) -> Result<EntityId, SimError> {
        if self.started {
            return Err(SimError::AlreadyStarted);
        }
        if self.names.contains_key(name) {
            return Err(SimError::DuplicateName(name.to_owned()));
        }
        let id = EntityId(self.entities.len() as u32);
        let actor = Actor::new(behavior);
        let kind = actor.kind();
        let gatherer = kind.consumes().then(|| Gatherer::new(&self.core.config.rate));
        let scatterer = kind
            .produces()
            .then(|| Scatterer::new(1, max_batch_size.max(1)));
        self.entities
            .push(Entity::new(id, name.to_owned(), actor, gatherer, scatterer));
        self.names.insert(name.to_owned(), id);
        debug!(entity = %id, name, kind = %kind, "entity added");
        Ok(id)
    }

    /// Open a stream path from producer `from` to consumer `to`. The path
    /// handshake runs on the first tick.
    pub fn connect(&mut self, from: EntityId, to: EntityId) -> Result<PathId, SimError> {
        if self.started {
            return Err(SimError::AlreadyStarted);
        }
        if from == to {
            return Err(SimError::SelfLoop(from));
        }
        let from_kind = self.entity(from).ok_or(SimError::UnknownEntity(from))?.kind;
        let to_kind = self.entity(to).ok_or(SimError::UnknownEntity(to))?.kind;
        if !from_kind.produces() {
            return Err(SimError::NotAProducer {
                entity: from,
                kind: from_kind,
            });
        }
        if !to_kind.consumes() {
            return Err(SimError::NotAConsumer {
                entity: to,
                kind: to_kind,
            });
        }
        let path = PathId(self.next_path);
        self.next_path += 1;
        self.entities[from.0 as usize].add_downstream(path, to);
        debug!(from = %from, to = %to, path = %path, "connected");
        Ok(path)
    }

    /// Connect two entities by name.
    pub fn connect_names(&mut self, from: &str, to: &str) -> Result<PathId, SimError> {
        let from = self.require(from)?;
        let to = self.require(to)?;
        self.connect(from, to)
    }

    fn require(&self, name: &str) -> Result<EntityId, SimError> {
        self.entity_id(name)
            .ok_or_else(|| SimError::UnknownName(name.to_owned()))
    }

    /// Register a presentation-layer observer.
    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.core.observers.push(observer);
    }

    // ── Driving ──────────────────────────────────────────────────

    /// Open every path and arm every control cycle. Runs implicitly on the
    /// first tick; calling it again is a no-op.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let Self { core, entities, .. } = self;
        for entity in entities.iter_mut() {
            entity.start(core);
        }
        info!(entities = self.entities.len(), "simulation started");
    }

    /// Advance the simulation by one tick.
    pub fn tick(&mut self) {
        self.run_tick(false);
    }

    /// Advance `n` ticks. Observers hear about idle statistics and
    /// `tick_completed` only for the last one.
    pub fn manual_tick(&mut self, n: u64) {
        for i in 0..n {
            self.run_tick(i + 1 < n);
        }
    }

    fn run_tick(&mut self, silent: bool) {
        let wall = Instant::now();
        self.start();
        self.core.now = self.core.now.next();
        let now = self.core.now;

        {
            let Self { core, entities, .. } = self;
            for entity in entities.iter_mut() {
                entity.before_tick(core);
            }
            for entity in entities.iter_mut() {
                let controller = entity.controller();
                let (spawned, joined) = (controller.spawned(), controller.joined());
                if entity.tick(core) {
                    core.metrics.current.entities_stepped += 1;
                }
                core.metrics.current.workers_spawned += entity.controller().spawned() - spawned;
                core.metrics.current.workers_joined += entity.controller().joined() - joined;
            }
            for entity in entities.iter_mut() {
                entity.after_tick();
            }
            let interval = core.config.ticks_per_interval;
            if interval > 0 && now.0 % interval == 0 {
                for entity in entities.iter_mut() {
                    entity.tock(core);
                }
            }
        }

        self.flush_events();
        if !silent {
            self.publish_idle_statistics();
        }
        self.core.metrics.finish_tick(wall.elapsed());
        if !silent {
            self.core.notify(|o| o.tick_completed(now));
        }
    }

    /// Run due events until none are left or the per-tick budget is spent.
    fn flush_events(&mut self) {
        let now = self.core.now;
        let budget = self.core.config.max_tick_events;
        let mut run = 0;
        while run < budget {
            let Some(event) = self.core.queue.pop_due(now) else {
                break;
            };
            event(self, now);
            run += 1;
        }
        self.core.metrics.current.events_run += run as u64;
        if run == budget && self.core.queue.next_due().is_some_and(|t| t <= now) {
            warn!(tick = %now, budget, "event budget exhausted, rest deferred");
        }
    }

    fn publish_idle_statistics(&mut self) {
        let now = self.core.now;
        let Self { core, entities, .. } = self;
        for entity in entities.iter_mut().filter(|e| e.kind.consumes()) {
            let value = idle_percentage(now, entity.idle_ticks);
            if entity.last_idle_percentage != Some(value) {
                entity.last_idle_percentage = Some(value);
                let id = entity.id;
                core.notify(|o| o.idle_percentage_changed(id, value));
            }
        }
        let global = self.average_global_idle_percentage();
        if self.core.last_global_idle != Some(global) {
            self.core.last_global_idle = Some(global);
            self.core.notify(|o| o.global_idle_percentage_changed(global));
        }
    }

    /// Schedule `event` after `delay`. Events due in the past run on the
    /// next flush.
    pub fn post(
        &mut self,
        delay: impl Into<Delay>,
        event: impl FnOnce(&mut Environment, Tick) + Send + 'static,
    ) {
        self.core.post(delay.into(), Box::new(event));
    }

    /// Send `message` over the simulated network, or locally when
    /// `from == to`.
    pub fn transmit(&mut self, from: EntityId, to: EntityId, message: Message) {
        self.core.transmit(from, to, message);
    }

    /// Place `message` in `to`'s mailbox immediately, with no sender.
    pub fn inject(&mut self, to: EntityId, message: Message) -> Result<MessageId, SimError> {
        let entity = self.entity(to).ok_or(SimError::UnknownEntity(to))?;
        if entity.mailbox.is_closed() {
            return Err(SimError::MailboxClosed(to));
        }
        self.deliver(None, to, message)
            .ok_or(SimError::MailboxClosed(to))
    }

    /// Enqueue a message, register it in the ledger and notify observers.
    pub(crate) fn deliver(
        &mut self,
        from: Option<EntityId>,
        to: EntityId,
        message: Message,
    ) -> Option<MessageId> {
        let now = self.core.now;
        let Some(entity) = self.entities.get_mut(to.0 as usize) else {
            warn!(to = %to, message = %message, "message for an unknown entity dropped");
            return None;
        };
        let Some(id) = entity.mailbox.enqueue(from, message.clone(), now) else {
            trace!(to = %to, message = %message, "mailbox closed, message dropped");
            return None;
        };
        if let Err(e) = self.core.ledger.register(to, id, from, message.clone(), now) {
            self.core.violation(e);
        }
        self.core.metrics.current.messages_delivered += 1;
        self.core
            .notify(|o| o.message_received(to, id, from, &message));
        Some(id)
    }

    pub(crate) fn apply_effects(&mut self, id: EntityId, effects: Vec<Effect>) {
        let Self { core, entities, .. } = self;
        let Some(entity) = entities.get_mut(id.0 as usize) else {
            return;
        };
        for effect in effects {
            match effect {
                Effect::Send { to, message } => core.transmit(id, to, message),
                Effect::BatchCompleted(report) => entity.batch_completed(core, report),
                Effect::Produced { items } => entity.produced(core, items),
            }
        }
    }

    /// Abort every step in progress and close every mailbox. Mail still
    /// waiting is dropped and leaves the ledger. Returns the number of
    /// steps aborted. Dropping the environment does the same.
    pub fn teardown(&mut self) -> usize {
        let Self { core, entities, .. } = self;
        let aborted = entities
            .iter_mut()
            .map(|e| e.teardown(&mut core.ledger))
            .filter(|&a| a)
            .count();
        if aborted > 0 {
            info!(aborted, "torn down with steps in progress");
        }
        aborted
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Current simulated time.
    pub fn now(&self) -> Tick {
        self.core.now
    }

    /// Whether the first tick has run.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Active configuration.
    pub fn config(&self) -> &SimConfig {
        &self.core.config
    }

    /// Change the free-running tick rate recorded in the configuration.
    pub fn set_ticks_per_second(&mut self, value: u32) {
        self.core.config.ticks_per_second = value;
    }

    /// Per-tick counters and wall-clock timings.
    pub fn metrics(&self) -> &TickMetrics {
        &self.core.metrics
    }

    /// The in-flight message ledger.
    pub fn ledger(&self) -> &MessageLedger {
        &self.core.ledger
    }

    /// Protocol violations recorded so far.
    pub fn protocol_violations(&self) -> &[ProtocolViolation] {
        &self.core.violations
    }

    /// Events waiting in the queue.
    pub fn pending_events(&self) -> usize {
        self.core.queue.len()
    }

    /// Look up an entity by id.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id.0 as usize)
    }

    /// Look up an entity id by name.
    pub fn entity_id(&self, name: &str) -> Option<EntityId> {
        self.names.get(name).copied()
    }

    /// All entities in creation order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    fn name_of(&self, id: EntityId) -> &str {
        self.entity(id).map_or("?", |e| e.name())
    }

    /// Read model of one entity.
    pub fn view(&self, id: EntityId) -> Option<EntityView> {
        let e = self.entity(id)?;
        Some(EntityView {
            id,
            name: e.name.clone(),
            kind: e.kind,
            state: e.state,
            started: e.started,
            mailbox_size: e.mailbox.len(),
            mailbox: e.mailbox.render(|from| self.name_of(from)),
            credit: e.scatterer.as_ref().map_or(0, Scatterer::credit),
            buffered: e.scatterer.as_ref().map_or(0, Scatterer::buffered),
            assigned_credit: e.gatherer.as_ref().map_or(0, Gatherer::assigned_credit),
            batch_size_hint: e.gatherer.as_ref().map_or(0, Gatherer::batch_size_hint),
            progress: e.progress,
            average_latency: self.core.ledger.average_latency(id),
            idle_ticks: e.idle_ticks,
        })
    }

    /// Read models of every entity in creation order.
    pub fn views(&self) -> Vec<EntityView> {
        self.entities
            .iter()
            .filter_map(|e| self.view(e.id))
            .collect()
    }

    /// Mean message latency of `id`, in ticks.
    pub fn average_latency(&self, id: EntityId) -> u64 {
        self.core.ledger.average_latency(id)
    }

    /// Mean of the per-entity latency averages.
    pub fn average_global_latency(&self) -> u64 {
        self.core.ledger.average_global_latency()
    }

    /// Idle percentage of `id`; see [`idle_percentage`].
    pub fn idle_percentage(&self, id: EntityId) -> f64 {
        self.entity(id)
            .map_or(0.0, |e| idle_percentage(self.core.now, e.idle_ticks))
    }

    /// Idle percentage averaged over sinks and stages. Zero without any.
    pub fn average_global_idle_percentage(&self) -> f64 {
        let consumers: Vec<f64> = self
            .entities
            .iter()
            .filter(|e| e.kind.consumes())
            .map(|e| idle_percentage(self.core.now, e.idle_ticks))
            .collect();
        if consumers.is_empty() {
            0.0
        } else {
            consumers.iter().sum::<f64>() / consumers.len() as f64
        }
    }

    /// Entities of the given kind, in creation order.
    pub fn entities_of(&self, kind: EntityKind) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.id)
            .collect()
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Envelope;
    use crate::step::StepContext;
    use tickflow_core::{Cancelled, EntityState};

    /// Sink-like behavior that spends `ticks` per message.
    struct Slow {
        ticks: u64,
    }

    impl Behavior for Slow {
        fn kind(&self) -> EntityKind {
            EntityKind::Sink
        }

        fn handle(&mut self, ctx: &mut StepContext, _envelope: &Envelope) -> Result<(), Cancelled> {
            ctx.begin_batch(EntityState::ConsumeBatch, 1, self.ticks);
            ctx.process_item()?;
            ctx.end_batch();
            Ok(())
        }
    }

    fn custom(text: &str) -> Message {
        Message::Custom(text.to_owned())
    }

    #[test]
    fn idle_percentage_is_zero_before_idling() {
        assert_eq!(idle_percentage(Tick(50), 0), 0.0);
    }

    #[test]
    fn idle_percentage_is_elapsed_over_idle() {
        assert_eq!(idle_percentage(Tick(10), 5), 200.0);
        assert_eq!(idle_percentage(Tick(10), 10), 100.0);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut env = Environment::default();
        env.add_sink("out", SinkConfig::default()).unwrap();
        assert_eq!(
            env.add_sink("out", SinkConfig::default()),
            Err(SimError::DuplicateName("out".into()))
        );
    }

    #[test]
    fn connect_checks_roles() {
        let mut env = Environment::default();
        let src = env.add_source("src", SourceConfig::default()).unwrap();
        let sink = env.add_sink("sink", SinkConfig::default()).unwrap();
        assert!(matches!(
            env.connect(sink, src),
            Err(SimError::NotAProducer { .. })
        ));
        assert_eq!(env.connect(src, src), Err(SimError::SelfLoop(src)));
        assert_eq!(
            env.connect(src, EntityId(9)),
            Err(SimError::UnknownEntity(EntityId(9)))
        );
        assert_eq!(env.connect(src, sink), Ok(PathId(0)));
    }

    #[test]
    fn topology_is_frozen_after_first_tick() {
        let mut env = Environment::default();
        env.tick();
        assert_eq!(
            env.add_sink("late", SinkConfig::default()),
            Err(SimError::AlreadyStarted)
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SimConfig {
            max_tick_events: 0,
            ..SimConfig::default()
        };
        assert!(Environment::new(config).is_err());
    }

    #[test]
    fn injected_message_is_read_on_next_tick() {
        let mut env = Environment::default();
        let id = env
            .add_entity("slow", Box::new(Slow { ticks: 1 }))
            .unwrap();
        env.inject(id, custom("hello")).unwrap();
        assert_eq!(env.ledger().in_flight(), 1);
        env.tick();
        let e = env.entity(id).unwrap();
        assert!(e.mailbox().is_empty());
        assert_eq!(env.ledger().in_flight(), 0);
    }

    #[test]
    fn a_batch_spans_one_tick_per_item_tick() {
        let mut env = Environment::default();
        let id = env
            .add_entity("slow", Box::new(Slow { ticks: 3 }))
            .unwrap();
        env.inject(id, custom("work")).unwrap();
        env.tick();
        assert_eq!(env.entity(id).unwrap().state(), EntityState::ConsumeBatch);
        env.tick();
        assert_eq!(env.entity(id).unwrap().state(), EntityState::ConsumeBatch);
        env.tick();
        assert_eq!(env.entity(id).unwrap().state(), EntityState::ConsumeBatch);
        env.tick();
        assert_eq!(env.entity(id).unwrap().state(), EntityState::Idle);
        assert_eq!(env.entity(id).unwrap().processed(), Some(1));
        assert_eq!(env.entity(id).unwrap().controller().spawned(), 1);
        assert_eq!(env.entity(id).unwrap().controller().joined(), 1);
    }

    #[test]
    fn teardown_aborts_parked_steps() {
        let mut env = Environment::default();
        let id = env
            .add_entity("slow", Box::new(Slow { ticks: 100 }))
            .unwrap();
        env.inject(id, custom("work")).unwrap();
        env.tick();
        assert!(env.entity(id).unwrap().controller().is_active());
        assert_eq!(env.teardown(), 1);
        let e = env.entity(id).unwrap();
        assert!(!e.controller().is_active());
        assert_eq!(e.controller().aborted(), 1);
        assert!(e.mailbox().is_closed());
    }

    #[test]
    fn events_posted_during_flush_run_in_the_same_tick() {
        let mut env = Environment::default();
        let id = env
            .add_entity("slow", Box::new(Slow { ticks: 1 }))
            .unwrap();
        env.post(Delay::Now, move |env: &mut Environment, _| {
            env.post(Delay::Now, move |env: &mut Environment, _| {
                env.inject(id, Message::Custom("late".into())).unwrap();
            });
        });
        env.tick();
        assert_eq!(env.entity(id).unwrap().mailbox().len(), 1);
    }

    #[test]
    fn event_budget_defers_the_remainder() {
        let config = SimConfig {
            max_tick_events: 2,
            ..SimConfig::default()
        };
        let mut env = Environment::new(config).unwrap();
        for _ in 0..5 {
            env.post(Delay::Now, |_: &mut Environment, _| {});
        }
        env.tick();
        assert_eq!(env.pending_events(), 3);
        assert_eq!(env.metrics().last.events_run, 2);
        env.tick();
        assert_eq!(env.pending_events(), 1);
    }

    #[test]
    fn same_seed_same_delays() {
        let draw = |seed| {
            let config = SimConfig {
                seed,
                min_delay: 1.into(),
                max_delay: 50.into(),
                ..SimConfig::default()
            };
            let mut env = Environment::new(config).unwrap();
            (0..20)
                .map(|_| env.core.target(Delay::Random).0)
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(7), draw(7));
        assert!(draw(7).iter().all(|&t| (1..=50).contains(&t)));
    }
}
