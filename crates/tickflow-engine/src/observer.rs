//! Discrete events published to the presentation layer.
//!
//! Observers are read-only consumers. Every method has an empty default so
//! an observer implements only what it displays.

use tickflow_core::{EntityId, MessageId, Tick};

use crate::protocol::Message;

/// Receiver of simulation events.
pub trait Observer: Send {
    /// A started consumer spent a whole tick idle with an empty mailbox.
    fn idling(&mut self, _entity: EntityId, _now: Tick) {}

    /// A message arrived in `entity`'s mailbox.
    fn message_received(
        &mut self,
        _entity: EntityId,
        _id: MessageId,
        _from: Option<EntityId>,
        _content: &Message,
    ) {
    }

    /// `entity` took message `id` out of its mailbox.
    fn message_consumed(&mut self, _entity: EntityId, _id: MessageId) {}

    /// The average latency of `entity` was recomputed.
    fn latency_changed(&mut self, _entity: EntityId, _value: u64) {}

    /// The average latency over all entities was recomputed.
    fn global_latency_changed(&mut self, _value: u64) {}

    /// The idle percentage of `entity` changed.
    fn idle_percentage_changed(&mut self, _entity: EntityId, _value: f64) {}

    /// The idle percentage averaged over all consumers changed.
    fn global_idle_percentage_changed(&mut self, _value: f64) {}

    /// A non-silent tick finished; refresh views.
    fn tick_completed(&mut self, _now: Tick) {}
}
