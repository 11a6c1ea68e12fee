//! Error types shared across the tickflow workspace.
//!
//! Protocol violations are values returned to the caller; broken
//! concurrency invariants are not represented here because they abort.

use thiserror::Error;

use crate::id::{EntityId, MessageId, PathId};

/// Protocol violations detected by the in-flight message ledger.
///
/// Each variant points at a logic bug in a producer or consumer
/// behavior. They are non-fatal to the simulation but must be surfaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// A message id was registered twice without being consumed.
    #[error("message {id} already in flight to entity {receiver}")]
    AlreadyRegistered {
        /// Receiving entity.
        receiver: EntityId,
        /// Offending message id.
        id: MessageId,
    },
    /// A message was consumed without having been received, or consumed twice.
    #[error("message {id} was never registered for entity {receiver}")]
    NotRegistered {
        /// Receiving entity.
        receiver: EntityId,
        /// Offending message id.
        id: MessageId,
    },
}

/// Any stream protocol violation observed by the simulation.
///
/// Violations are recorded and the offending message is dropped; the
/// simulation keeps running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// Reported by the in-flight message ledger.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// A producer opened a path the consumer already has open.
    #[error("path {path} is already open on entity {receiver}")]
    DuplicateOpen {
        /// Consuming entity.
        receiver: EntityId,
        /// Path opened twice.
        path: PathId,
    },
}

/// Raised inside a worker when its step has been aborted.
///
/// Returned from every yield point once the owning entity is torn down.
/// Behaviors propagate it with `?` so the step unwinds without running
/// further application logic. The driving thread never sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("step cancelled")]
pub struct Cancelled;
