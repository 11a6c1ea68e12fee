//! The actor boundary: mailbox, behaviors, and the actor that owns one.
//!
//! A [`Behavior`] is the application logic of an entity. It handles one
//! mailbox message per step and may suspend mid-message at the yield
//! points of its [`StepContext`]. Everything it wants to change outside
//! itself goes through the context as an effect.

use std::collections::VecDeque;

use tickflow_core::{Cancelled, EntityId, EntityKind, MessageId, Tick};

use crate::protocol::Message;
use crate::step::StepContext;

// ── Envelope / Mailbox ─────────────────────────────────────────────

/// A message sitting in a mailbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Entity-unique ascending id assigned on arrival.
    pub id: MessageId,
    /// Sending entity, `None` for messages injected by the environment.
    pub from: Option<EntityId>,
    /// Payload.
    pub message: Message,
    /// Arrival tick.
    pub enqueued: Tick,
}

/// FIFO mailbox of one entity.
#[derive(Clone, Debug, Default)]
pub struct Mailbox {
    queue: VecDeque<Envelope>,
    next_id: u64,
    closed: bool,
}

impl Mailbox {
    /// An empty, open mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its id, or `None` once closed.
    pub fn enqueue(
        &mut self,
        from: Option<EntityId>,
        message: Message,
        now: Tick,
    ) -> Option<MessageId> {
        if self.closed {
            return None;
        }
        let id = MessageId(self.next_id);
        self.next_id += 1;
        self.queue.push_back(Envelope {
            id,
            from,
            message,
            enqueued: now,
        });
        Some(id)
    }

    /// Whether a message is waiting.
    pub fn has_items(&self) -> bool {
        !self.closed && !self.queue.is_empty()
    }

    /// The next message, without removing it.
    pub fn peek(&self) -> Option<&Envelope> {
        self.queue.front()
    }

    /// Remove the next message.
    pub fn pop(&mut self) -> Option<Envelope> {
        self.queue.pop_front()
    }

    /// Number of waiting messages.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no message is waiting.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Waiting messages, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Envelope> {
        self.queue.iter()
    }

    /// Refuse further messages and drop the waiting ones.
    pub fn close(&mut self) -> Vec<Envelope> {
        self.closed = true;
        self.queue.drain(..).collect()
    }

    /// Whether the mailbox has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// One line per waiting message, e.g. `From: src -> batch #3 of size 12`.
    pub fn render<'a>(&self, name_of: impl Fn(EntityId) -> &'a str) -> Vec<String> {
        self.queue
            .iter()
            .map(|e| match e.from {
                Some(from) => format!("From: {} -> {}", name_of(from), e.message.describe()),
                None => e.message.describe(),
            })
            .collect()
    }
}

// ── Behavior / Actor ───────────────────────────────────────────────

/// Application logic of an entity.
///
/// `handle` runs on a step worker thread. It must reach every long
/// computation through the yield points of `ctx` and propagate
/// [`Cancelled`] with `?` so an aborted step unwinds immediately.
pub trait Behavior: Send + 'static {
    /// Role of the entity running this behavior.
    fn kind(&self) -> EntityKind;

    /// Handle one mailbox message.
    fn handle(&mut self, ctx: &mut StepContext, envelope: &Envelope) -> Result<(), Cancelled>;
}

/// A behavior plus its step bookkeeping. Moved onto the worker thread for
/// the duration of a step.
pub struct Actor {
    behavior: Box<dyn Behavior>,
    processed: u64,
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("kind", &self.behavior.kind())
            .field("processed", &self.processed)
            .finish()
    }
}

impl Actor {
    /// Wrap a behavior.
    pub fn new(behavior: Box<dyn Behavior>) -> Self {
        Self {
            behavior,
            processed: 0,
        }
    }

    /// Role of the wrapped behavior.
    pub fn kind(&self) -> EntityKind {
        self.behavior.kind()
    }

    /// Messages fully processed so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Run one message to completion or cancellation.
    pub(crate) fn process(
        &mut self,
        ctx: &mut StepContext,
        envelope: &Envelope,
    ) -> Result<(), Cancelled> {
        self.behavior.handle(ctx, envelope)?;
        self.processed += 1;
        Ok(())
    }
}
