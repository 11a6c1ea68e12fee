//! Environment-level errors.

use thiserror::Error;
use tickflow_core::{EntityId, EntityKind, LedgerError};

use crate::config::ConfigError;

/// Errors returned while building or driving an [`Environment`](crate::Environment).
#[derive(Clone, Debug, PartialEq, Error)]
pub enum SimError {
    /// No entity with this id exists.
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    /// No entity with this name exists.
    #[error("unknown entity '{0}'")]
    UnknownName(String),
    /// Entity names must be unique.
    #[error("an entity named '{0}' already exists")]
    DuplicateName(String),
    /// The upstream end of a connection must produce items.
    #[error("entity {entity} is a {kind} and cannot produce")]
    NotAProducer {
        /// Offending entity.
        entity: EntityId,
        /// Its kind.
        kind: EntityKind,
    },
    /// The downstream end of a connection must consume items.
    #[error("entity {entity} is a {kind} and cannot consume")]
    NotAConsumer {
        /// Offending entity.
        entity: EntityId,
        /// Its kind.
        kind: EntityKind,
    },
    /// The entity has been torn down and accepts no more mail.
    #[error("mailbox of entity {0} is closed")]
    MailboxClosed(EntityId),
    /// An entity cannot feed itself.
    #[error("entity {0} cannot be connected to itself")]
    SelfLoop(EntityId),
    /// Topology is frozen once the first tick has run.
    #[error("the simulation has already started")]
    AlreadyStarted,
    /// A protocol violation reported by the message ledger.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
