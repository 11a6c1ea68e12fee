//! Tickflow: a tick-synchronized discrete-event simulator for actor
//! streaming pipelines with credit-based flow control.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all tickflow sub-crates.
//!
//! # Quick start
//!
//! ```rust
//! use tickflow::prelude::*;
//!
//! let config = SimConfig {
//!     ticks_per_second: 0,
//!     seed: 42,
//!     ..SimConfig::default()
//! };
//! let mut env = Environment::new(config).unwrap();
//! let source = env.add_source("source", SourceConfig::default()).unwrap();
//! let sink = env.add_sink("sink", SinkConfig::default()).unwrap();
//! env.connect(source, sink).unwrap();
//!
//! env.manual_tick(200);
//! assert_eq!(env.now(), Tick(200));
//! assert!(env.protocol_violations().is_empty());
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tickflow-core` | Clock, ids, entity state, shared errors |
//! | [`flow`] | `tickflow-flow` | Gatherer, scatterer, token and PID estimators |
//! | [`engine`] | `tickflow-engine` | Environment, step controller, ledger, driver |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Clock, identifiers and entity state (`tickflow-core`).
pub use tickflow_core as types;

/// Credit-based flow control (`tickflow-flow`).
///
/// [`flow::Gatherer`] on the consuming side, [`flow::Scatterer`] on the
/// producing side, and the two rate estimators behind
/// [`flow::RateController`].
pub use tickflow_flow as flow;

/// Simulation runtime (`tickflow-engine`).
///
/// [`engine::Environment`] for synchronous ticking,
/// [`engine::RealtimeDriver`] for a free-running background thread.
pub use tickflow_engine as engine;

/// Common imports for typical tickflow usage.
pub mod prelude {
    // Core types
    pub use tickflow_core::{
        EntityId, EntityKind, EntityState, MessageId, PathId, ProtocolViolation, Tick,
        TickDuration,
    };

    // Flow control configuration
    pub use tickflow_flow::{PidConfig, RateConfig, RateKind, TokenConfig};

    // Engine
    pub use tickflow_engine::{
        Behavior, Delay, Environment, EntityView, Message, Observer, RealtimeDriver, SimConfig,
        SimError, SinkConfig, SourceConfig, StageConfig, StepContext,
    };
}
