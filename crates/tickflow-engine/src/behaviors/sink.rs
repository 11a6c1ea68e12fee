use tickflow_core::{Cancelled, EntityKind};

use crate::actor::{Behavior, Envelope};
use crate::config::SinkConfig;
use crate::protocol::Message;
use crate::step::StepContext;

/// Consumes every inbound batch, `ticks_per_item` ticks per item.
#[derive(Clone, Debug)]
pub struct SinkBehavior {
    config: SinkConfig,
}

impl SinkBehavior {
    /// Create a sink behavior.
    pub fn new(config: SinkConfig) -> Self {
        Self { config }
    }
}

impl Behavior for SinkBehavior {
    fn kind(&self) -> EntityKind {
        EntityKind::Sink
    }

    fn handle(&mut self, ctx: &mut StepContext, envelope: &Envelope) -> Result<(), Cancelled> {
        let Message::Batch { path, size, .. } = envelope.message else {
            return Ok(());
        };
        super::consume_batch(ctx, envelope, path, size, self.config.ticks_per_item, || {})
    }
}
