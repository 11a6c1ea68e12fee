//! Credit-based flow control for tickflow pipelines.
//!
//! A consumer's [`Gatherer`] turns batch-completion reports into credit
//! grants for its upstream paths, using one of two estimators chosen at
//! construction time ([`RateController`]):
//!
//! - [`TokenGenerator`] is cycle-based. It measures time per item over a
//!   control cycle and hands out `cycle_duration / time_per_item` tokens.
//! - [`PidEstimator`] is continuous, a floor-clamped PID loop over the
//!   per-path processing rate.
//!
//! A producer's [`Scatterer`] spends that credit when emitting batches and
//! records throughput samples per [`OutboundPath`]. An entity that does
//! both caps its gatherer at the scatterer's headroom
//! ([`Gatherer::set_credit_cap`]), so backpressure reaches upstream.
//!
//! Everything here is single-threaded and infallible: degenerate inputs
//! (zero elapsed time, zero processed items) hold the previous estimate.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod path;
pub mod pid;
pub mod samples;
pub mod scatterer;
pub mod tokens;

pub use config::{PidConfig, RateConfig, RateConfigError, RateKind, TokenConfig};
pub use controller::{BatchReport, CreditGrant, CycleTimer, FlowUpdate, Gatherer, RateController};
pub use path::{InboundPath, OutboundPath};
pub use pid::{PidEstimator, RateState};
pub use samples::ThroughputSamples;
pub use scatterer::{OutgoingBatch, Scatterer};
pub use tokens::{TokenCycle, TokenGenerator};
