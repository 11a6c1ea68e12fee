use tickflow_core::{Cancelled, EntityKind, EntityState};

use crate::actor::{Behavior, Envelope};
use crate::config::SourceConfig;
use crate::protocol::Message;
use crate::step::StepContext;

/// Generates items while outbound credit lasts.
///
/// Every credit grant and every `Generate` message produces up to
/// `max_batch_size` items. If credit remains afterwards the source asks
/// itself to continue with another `Generate`.
#[derive(Clone, Debug)]
pub struct SourceBehavior {
    config: SourceConfig,
}

impl SourceBehavior {
    /// Create a source behavior.
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn generate(&mut self, ctx: &mut StepContext) -> Result<(), Cancelled> {
        let headroom = ctx.flow().headroom;
        let n = headroom.min(self.config.max_batch_size);
        if n == 0 {
            return Ok(());
        }
        if self.config.ticks_per_item > 0 {
            ctx.begin_batch(EntityState::ProduceBatch, n, self.config.ticks_per_item);
            for _ in 0..n {
                ctx.process_item()?;
            }
            ctx.end_batch();
        }
        ctx.produce(n);
        // Emitting spends credit and buffer alike, so headroom only drops by n.
        if headroom > n {
            let me = ctx.me();
            ctx.send(me, Message::Generate);
        }
        Ok(())
    }
}

impl Behavior for SourceBehavior {
    fn kind(&self) -> EntityKind {
        EntityKind::Source
    }

    fn handle(&mut self, ctx: &mut StepContext, envelope: &Envelope) -> Result<(), Cancelled> {
        match envelope.message {
            Message::AckOpen { .. } | Message::AckBatch { .. } | Message::Generate => {
                self.generate(ctx)
            }
            _ => Ok(()),
        }
    }
}
