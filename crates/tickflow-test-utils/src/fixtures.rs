//! Scripted behaviors for driving the step controller from tests.
//!
//! - [`Busy`]: spends a fixed number of ticks on every message.
//! - [`Echo`]: replies to every custom message with the same text.
//! - [`Counting`]: counts handled messages into a shared counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tickflow_core::{Cancelled, EntityId, EntityKind, EntityState};
use tickflow_engine::{Behavior, Envelope, Message, StepContext};

/// Consumer that spends `ticks` ticks on each message, as one batch of one
/// item.
pub struct Busy {
    pub ticks: u64,
    pub kind: EntityKind,
}

impl Busy {
    pub fn new(ticks: u64) -> Self {
        Self {
            ticks,
            kind: EntityKind::Sink,
        }
    }
}

impl Behavior for Busy {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn handle(&mut self, ctx: &mut StepContext, _envelope: &Envelope) -> Result<(), Cancelled> {
        if self.ticks == 0 {
            return Ok(());
        }
        ctx.begin_batch(EntityState::ConsumeBatch, 1, self.ticks);
        ctx.process_item()?;
        ctx.end_batch();
        Ok(())
    }
}

/// Replies to every custom message with the same text, to `peer` or to
/// the sender.
pub struct Echo {
    pub peer: Option<EntityId>,
}

impl Behavior for Echo {
    fn kind(&self) -> EntityKind {
        EntityKind::Sink
    }

    fn handle(&mut self, ctx: &mut StepContext, envelope: &Envelope) -> Result<(), Cancelled> {
        if let Message::Custom(text) = &envelope.message {
            if let Some(to) = self.peer.or(envelope.from) {
                ctx.send(to, Message::Custom(text.clone()));
            }
        }
        Ok(())
    }
}

/// Counts handled messages; each takes `ticks` ticks.
pub struct Counting {
    pub ticks: u64,
    pub handled: Arc<AtomicU64>,
}

impl Counting {
    pub fn new(ticks: u64) -> (Self, Arc<AtomicU64>) {
        let handled = Arc::new(AtomicU64::new(0));
        (
            Self {
                ticks,
                handled: Arc::clone(&handled),
            },
            handled,
        )
    }
}

impl Behavior for Counting {
    fn kind(&self) -> EntityKind {
        EntityKind::Sink
    }

    fn handle(&mut self, ctx: &mut StepContext, _envelope: &Envelope) -> Result<(), Cancelled> {
        if self.ticks > 0 {
            ctx.begin_batch(EntityState::ConsumeBatch, 1, self.ticks);
            ctx.process_item()?;
            ctx.end_batch();
        }
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
