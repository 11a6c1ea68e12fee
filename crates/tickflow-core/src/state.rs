//! Entity control states and entity kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Control state of an entity, advanced once per tick by the scheduler.
///
/// A stage runs its consuming and producing halves through the same
/// field; `ConsumeBatch` and `ProduceBatch` both mean "mid-step, resume
/// the actor on the next tick".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    /// Nothing to do, or waiting for the mailbox to fill.
    #[default]
    Idle,
    /// `before_tick` saw a pending mailbox item; `tick` will step the actor.
    ReadMailbox,
    /// Consuming the items of an inbound batch, one tick at a time.
    ConsumeBatch,
    /// Producing the items of an outbound batch, one tick at a time.
    ProduceBatch,
}

impl EntityState {
    /// Whether the actor is suspended in the middle of a step.
    pub fn is_mid_batch(self) -> bool {
        matches!(self, Self::ConsumeBatch | Self::ProduceBatch)
    }

    /// Lowercase name, as shown in read models.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ReadMailbox => "read_mailbox",
            Self::ConsumeBatch => "consume_batch",
            Self::ProduceBatch => "produce_batch",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of an entity in the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Emits items; has an outbound side only.
    Source,
    /// Consumes items; has an inbound side only.
    Sink,
    /// Consumes and re-emits items; has both sides.
    Stage,
}

impl EntityKind {
    /// Whether this kind receives batches and grants credit upstream.
    pub fn consumes(self) -> bool {
        matches!(self, Self::Sink | Self::Stage)
    }

    /// Whether this kind emits batches downstream.
    pub fn produces(self) -> bool {
        matches!(self, Self::Source | Self::Stage)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Sink => f.write_str("sink"),
            Self::Stage => f.write_str("stage"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_match_read_model() {
        assert_eq!(EntityState::Idle.to_string(), "idle");
        assert_eq!(EntityState::ReadMailbox.to_string(), "read_mailbox");
        assert_eq!(EntityState::ConsumeBatch.to_string(), "consume_batch");
        assert_eq!(EntityState::ProduceBatch.to_string(), "produce_batch");
    }

    #[test]
    fn only_batch_states_are_mid_step() {
        assert!(!EntityState::Idle.is_mid_batch());
        assert!(!EntityState::ReadMailbox.is_mid_batch());
        assert!(EntityState::ConsumeBatch.is_mid_batch());
        assert!(EntityState::ProduceBatch.is_mid_batch());
    }

    #[test]
    fn stage_has_both_sides() {
        assert!(EntityKind::Stage.consumes() && EntityKind::Stage.produces());
        assert!(!EntityKind::Source.consumes());
        assert!(!EntityKind::Sink.produces());
    }
}
