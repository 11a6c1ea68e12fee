//! Core types for the tickflow simulator.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! simulated clock ([`Tick`], [`TickDuration`]), strongly-typed identifiers,
//! the entity control state enum, and the error types shared by the
//! flow-control and engine crates.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod state;
pub mod time;

pub use error::{Cancelled, LedgerError, ProtocolViolation};
pub use id::{BatchId, EntityId, MessageId, PathId};
pub use state::{EntityKind, EntityState};
pub use time::{Tick, TickDuration, TICKS_PER_SECOND_OF_SIM};
