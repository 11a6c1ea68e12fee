//! Tick scheduler and entity runtime for tickflow simulations.
//!
//! An [`Environment`] owns a set of entities (sources, stages, sinks),
//! a delayed-event queue and an in-flight message ledger. Each tick runs
//! the entities' phases in creation order and then flushes due events.
//! An entity in the middle of a batch runs its [`Behavior`] on a
//! dedicated step worker that advances exactly one yield per tick, under
//! the control of a [`StepController`].
//!
//! [`Environment`] is driven synchronously by calling
//! [`tick`](Environment::tick). [`RealtimeDriver`] runs the same loop on
//! a background thread at a configurable rate.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod actor;
pub mod behaviors;
pub mod config;
pub mod entity;
pub mod environment;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod observer;
pub mod protocol;
pub mod realtime;
pub mod scheduler;
pub mod step;

pub use actor::{Actor, Behavior, Envelope, Mailbox};
pub use behaviors::{SinkBehavior, SourceBehavior, StageBehavior};
pub use config::{ConfigError, SimConfig, SinkConfig, SourceConfig, StageConfig};
pub use entity::{Entity, EntityView};
pub use environment::{idle_percentage, Environment};
pub use error::SimError;
pub use ledger::{InFlightMessage, LatencyStats, MessageLedger};
pub use metrics::{TickCounters, TickMetrics};
pub use observer::Observer;
pub use protocol::Message;
pub use realtime::{DriverError, DriverSnapshot, RealtimeDriver};
pub use scheduler::{Delay, Event, EventQueue};
pub use step::{
    BatchProgress, Effect, FlowSnapshot, HandoffState, StepContext, StepController, StepOutcome,
    StepReport,
};
