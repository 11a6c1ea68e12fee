//! Test utilities for tickflow development.
//!
//! Provides a [`RecordingObserver`] that captures every observer event
//! into a shared log, and topology helpers for the pipelines most tests
//! need. Scripted behaviors live in [`fixtures`].

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::{Arc, Mutex, MutexGuard};

use tickflow_core::{EntityId, MessageId, Tick};
use tickflow_engine::{
    Environment, Message, Observer, SimConfig, SinkConfig, SourceConfig, StageConfig,
};

/// One observer callback, as recorded.
#[derive(Clone, Debug, PartialEq)]
pub enum ObservedEvent {
    Idling { entity: EntityId, now: Tick },
    MessageReceived { entity: EntityId, id: MessageId, from: Option<EntityId>, content: Message },
    MessageConsumed { entity: EntityId, id: MessageId },
    LatencyChanged { entity: EntityId, value: u64 },
    GlobalLatencyChanged(u64),
    IdlePercentageChanged { entity: EntityId, value: f64 },
    GlobalIdlePercentageChanged(f64),
    TickCompleted(Tick),
}

/// Observer that appends every event to a log shared with the test.
///
/// Clone the observer before handing it to the environment; all clones
/// share one log.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    log: Arc<Mutex<Vec<ObservedEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: ObservedEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ObservedEvent>> {
        // A panicking test thread poisons the lock; the log is still usable.
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.lock().clone()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&ObservedEvent) -> bool) -> usize {
        self.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Observer for RecordingObserver {
    fn idling(&mut self, entity: EntityId, now: Tick) {
        self.push(ObservedEvent::Idling { entity, now });
    }

    fn message_received(
        &mut self,
        entity: EntityId,
        id: MessageId,
        from: Option<EntityId>,
        content: &Message,
    ) {
        self.push(ObservedEvent::MessageReceived {
            entity,
            id,
            from,
            content: content.clone(),
        });
    }

    fn message_consumed(&mut self, entity: EntityId, id: MessageId) {
        self.push(ObservedEvent::MessageConsumed { entity, id });
    }

    fn latency_changed(&mut self, entity: EntityId, value: u64) {
        self.push(ObservedEvent::LatencyChanged { entity, value });
    }

    fn global_latency_changed(&mut self, value: u64) {
        self.push(ObservedEvent::GlobalLatencyChanged(value));
    }

    fn idle_percentage_changed(&mut self, entity: EntityId, value: f64) {
        self.push(ObservedEvent::IdlePercentageChanged { entity, value });
    }

    fn global_idle_percentage_changed(&mut self, value: f64) {
        self.push(ObservedEvent::GlobalIdlePercentageChanged(value));
    }

    fn tick_completed(&mut self, now: Tick) {
        self.push(ObservedEvent::TickCompleted(now));
    }
}

/// Ids of a `source -> stage -> sink` pipeline.
#[derive(Clone, Copy, Debug)]
pub struct Pipeline {
    pub source: EntityId,
    pub stage: Option<EntityId>,
    pub sink: EntityId,
}

/// `source -> sink` with default entity settings.
pub fn source_to_sink(config: SimConfig) -> (Environment, Pipeline) {
    let mut env = Environment::new(config).expect("valid config");
    let source = env.add_source("source", SourceConfig::default()).expect("add source");
    let sink = env.add_sink("sink", SinkConfig::default()).expect("add sink");
    env.connect(source, sink).expect("connect");
    (
        env,
        Pipeline {
            source,
            stage: None,
            sink,
        },
    )
}

/// `source -> stage -> sink` with the given stage settings.
pub fn three_stage(config: SimConfig, stage: StageConfig) -> (Environment, Pipeline) {
    let mut env = Environment::new(config).expect("valid config");
    let source = env.add_source("source", SourceConfig::default()).expect("add source");
    let mid = env.add_stage("stage", stage).expect("add stage");
    let sink = env.add_sink("sink", SinkConfig::default()).expect("add sink");
    env.connect(source, mid).expect("connect source");
    env.connect(mid, sink).expect("connect stage");
    (
        env,
        Pipeline {
            source,
            stage: Some(mid),
            sink,
        },
    )
}

/// Manual-only configuration with a fixed seed.
pub fn manual_config(seed: u64) -> SimConfig {
    SimConfig {
        ticks_per_second: 0,
        seed,
        ..SimConfig::default()
    }
}
