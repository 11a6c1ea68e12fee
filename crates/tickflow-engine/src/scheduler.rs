//! Delayed-event queue of the tick scheduler.
//!
//! Events are keyed by absolute target tick and run in posting order
//! within a tick. An event whose target has already passed when the
//! queue is inspected counts as due.

use std::collections::BTreeMap;
use std::fmt;

use smallvec::SmallVec;
use tickflow_core::{Tick, TickDuration};

use crate::environment::Environment;

/// A deferred callback. Receives the environment and the tick it runs at.
pub type Event = Box<dyn FnOnce(&mut Environment, Tick) + Send>;

/// Requested delay of a posted event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delay {
    /// At the end of the current tick.
    Now,
    /// This many ticks in the future. `Ticks(0)` equals `Now`.
    Ticks(u64),
    /// A random delay drawn from the configured network delay range.
    Random,
}

impl From<i64> for Delay {
    /// `0` is [`Delay::Now`], positive values are [`Delay::Ticks`], and any
    /// negative value (conventionally `-1`) is [`Delay::Random`].
    fn from(raw: i64) -> Self {
        match raw {
            0 => Self::Now,
            n if n > 0 => Self::Ticks(n as u64),
            _ => Self::Random,
        }
    }
}

impl From<TickDuration> for Delay {
    fn from(d: TickDuration) -> Self {
        if d.is_zero() {
            Self::Now
        } else {
            Self::Ticks(d.0)
        }
    }
}

/// Events of one target tick. Popped events leave a `None` behind the
/// cursor so a pop never shifts the rest.
#[derive(Default)]
struct Slot {
    events: SmallVec<[Option<Event>; 4]>,
    head: usize,
}

/// Pending events ordered by target tick.
#[derive(Default)]
pub struct EventQueue {
    slots: BTreeMap<Tick, Slot>,
    len: usize,
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.len)
            .field("next_due", &self.next_due())
            .finish()
    }
}

impl EventQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `event` to run at `at`.
    pub fn push(&mut self, at: Tick, event: Event) {
        self.slots.entry(at).or_default().events.push(Some(event));
        self.len += 1;
    }

    /// Remove and return the earliest-posted event due at or before `now`.
    pub fn pop_due(&mut self, now: Tick) -> Option<Event> {
        let mut entry = self.slots.first_entry()?;
        if *entry.key() > now {
            return None;
        }
        let slot = entry.get_mut();
        let event = slot.events.get_mut(slot.head).and_then(Option::take);
        slot.head += 1;
        if slot.head >= slot.events.len() {
            entry.remove();
        }
        self.len -= 1;
        event
    }

    /// Target tick of the earliest pending event.
    pub fn next_due(&self) -> Option<Tick> {
        self.slots.keys().next().copied()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no events are pending.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
