//! Strongly-typed identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies an entity (source, stage or sink) within an environment.
///
/// Entities are registered before the simulation starts and assigned
/// sequential IDs. `EntityId(n)` is the n-th registered entity, which is
/// also its position in the per-tick phase order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for EntityId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies one stream edge between a producer and a consumer.
///
/// The same `PathId` names the outbound side at the producer and the
/// inbound side at the consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathId(pub u32);

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PathId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Entity-unique, ascending identifier of a delivered message.
///
/// Assigned when a message lands in a mailbox. Two messages in different
/// mailboxes may share a `MessageId`; the ledger keys entries by
/// `(receiver, MessageId)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Sequence number of a batch on one outbound path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(pub u64);

impl BatchId {
    /// The id following `self`.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
