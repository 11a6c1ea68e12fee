use tickflow_core::{Cancelled, EntityKind};

use crate::actor::{Behavior, Envelope};
use crate::config::StageConfig;
use crate::protocol::Message;
use crate::step::StepContext;

/// Consumes like a sink; every `ratio_in` consumed items yield
/// `ratio_out` output items, handed downstream when the input batch is
/// done.
#[derive(Clone, Debug)]
pub struct StageBehavior {
    config: StageConfig,
    completed_items: u64,
}

impl StageBehavior {
    /// Create a stage behavior.
    pub fn new(config: StageConfig) -> Self {
        Self {
            config,
            completed_items: 0,
        }
    }
}

impl Behavior for StageBehavior {
    fn kind(&self) -> EntityKind {
        EntityKind::Stage
    }

    fn handle(&mut self, ctx: &mut StepContext, envelope: &Envelope) -> Result<(), Cancelled> {
        let Message::Batch { path, size, .. } = envelope.message else {
            return Ok(());
        };
        let (ratio_in, ratio_out) = (self.config.ratio_in.max(1), self.config.ratio_out);
        let completed = &mut self.completed_items;
        let mut output = 0;
        super::consume_batch(ctx, envelope, path, size, self.config.ticks_per_item, || {
            *completed += 1;
            if *completed >= ratio_in {
                *completed = 0;
                output += ratio_out;
            }
        })?;
        ctx.produce(output);
        Ok(())
    }
}
