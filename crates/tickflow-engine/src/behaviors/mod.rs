//! Built-in behaviors for the three entity kinds.
//!
//! Flow-control bookkeeping (opening paths, spending and granting credit)
//! happens on the driving thread when a message is taken out of the
//! mailbox. These behaviors only model the time items take and report
//! what they consumed or produced.

mod sink;
mod source;
mod stage;

pub use sink::SinkBehavior;
pub use source::SourceBehavior;
pub use stage::StageBehavior;

use tickflow_core::{Cancelled, EntityState, PathId};
use tickflow_flow::BatchReport;

use crate::actor::Envelope;
use crate::step::StepContext;

/// Consume `size` items at `ticks_per_item` each, calling `on_item` after
/// every item, then report the batch to the rate estimator.
fn consume_batch(
    ctx: &mut StepContext,
    envelope: &Envelope,
    path: PathId,
    size: u64,
    ticks_per_item: u64,
    mut on_item: impl FnMut(),
) -> Result<(), Cancelled> {
    let started = ctx.now();
    let batched = ticks_per_item > 0 && size > 0;
    if batched {
        ctx.begin_batch(EntityState::ConsumeBatch, size, ticks_per_item);
    }
    for _ in 0..size {
        if batched {
            ctx.process_item()?;
        }
        on_item();
    }
    if batched {
        ctx.end_batch();
    }
    ctx.report_batch(BatchReport {
        path,
        size,
        enqueued: envelope.enqueued,
        started,
        finished: ctx.now(),
    });
    Ok(())
}
