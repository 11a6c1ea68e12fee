//! In-flight message ledger and latency statistics.
//!
//! Every message delivered to a mailbox is registered under
//! `(receiver, id)` with its arrival tick. Consuming it deregisters the
//! entry and records `now - enqueued` as a latency sample for the
//! receiver. Registering twice or deregistering an unknown entry is a
//! protocol violation and reported as a [`LedgerError`].

use std::collections::VecDeque;

use indexmap::IndexMap;
use tickflow_core::{EntityId, LedgerError, MessageId, Tick, TickDuration};

use crate::protocol::Message;

/// Number of recent latency samples retained per entity.
pub const LATENCY_HISTORY: usize = 1000;

/// One outstanding message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InFlightMessage {
    /// Sending entity, `None` for messages injected by the environment.
    pub sender: Option<EntityId>,
    /// Receiving entity.
    pub receiver: EntityId,
    /// Payload.
    pub content: Message,
    /// Arrival tick.
    pub enqueued: Tick,
}

/// Latency samples of one receiver.
#[derive(Clone, Debug, Default)]
pub struct LatencyStats {
    recent: VecDeque<TickDuration>,
    total: u64,
    count: u64,
}

impl LatencyStats {
    fn record(&mut self, latency: TickDuration) {
        if self.recent.len() == LATENCY_HISTORY {
            self.recent.pop_front();
        }
        self.recent.push_back(latency);
        self.total = self.total.saturating_add(latency.0);
        self.count += 1;
    }

    /// Integer mean over all samples, 0 without samples.
    pub fn average(&self) -> u64 {
        self.total.checked_div(self.count).unwrap_or(0)
    }

    /// Number of samples recorded.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Most recent samples, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = TickDuration> + '_ {
        self.recent.iter().copied()
    }
}

/// Outstanding messages of all entities plus their latency history.
#[derive(Clone, Debug, Default)]
pub struct MessageLedger {
    in_flight: IndexMap<(EntityId, MessageId), InFlightMessage>,
    latencies: IndexMap<EntityId, LatencyStats>,
}

impl MessageLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `content` arrived in `receiver`'s mailbox as `id`.
    pub fn register(
        &mut self,
        receiver: EntityId,
        id: MessageId,
        sender: Option<EntityId>,
        content: Message,
        now: Tick,
    ) -> Result<(), LedgerError> {
        let key = (receiver, id);
        if self.in_flight.contains_key(&key) {
            return Err(LedgerError::AlreadyRegistered { receiver, id });
        }
        self.in_flight.insert(
            key,
            InFlightMessage {
                sender,
                receiver,
                content,
                enqueued: now,
            },
        );
        Ok(())
    }

    /// Record that `receiver` consumed message `id` and return its latency.
    pub fn deregister(
        &mut self,
        receiver: EntityId,
        id: MessageId,
        now: Tick,
    ) -> Result<TickDuration, LedgerError> {
        let entry = self
            .in_flight
            .shift_remove(&(receiver, id))
            .ok_or(LedgerError::NotRegistered { receiver, id })?;
        let latency = now - entry.enqueued;
        self.latencies.entry(receiver).or_default().record(latency);
        Ok(latency)
    }

    /// Forget a message that will never be consumed, without recording a
    /// latency sample. Returns whether it was outstanding.
    pub fn discard(&mut self, receiver: EntityId, id: MessageId) -> bool {
        self.in_flight.shift_remove(&(receiver, id)).is_some()
    }

    /// An outstanding message.
    pub fn get(&self, receiver: EntityId, id: MessageId) -> Option<&InFlightMessage> {
        self.in_flight.get(&(receiver, id))
    }

    /// Number of outstanding messages.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Latency history of one receiver.
    pub fn stats(&self, receiver: EntityId) -> Option<&LatencyStats> {
        self.latencies.get(&receiver)
    }

    /// Mean latency of `receiver`, 0 without samples.
    pub fn average_latency(&self, receiver: EntityId) -> u64 {
        self.latencies.get(&receiver).map_or(0, LatencyStats::average)
    }

    /// Mean of the per-entity averages over entities with samples.
    pub fn average_global_latency(&self) -> u64 {
        let sampled: Vec<u64> = self
            .latencies
            .values()
            .filter(|s| s.count > 0)
            .map(LatencyStats::average)
            .collect();
        if sampled.is_empty() {
            0
        } else {
            sampled.iter().sum::<u64>() / sampled.len() as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reg(l: &mut MessageLedger, r: u32, id: u64, now: u64) -> Result<(), LedgerError> {
        l.register(
            EntityId(r),
            MessageId(id),
            None,
            Message::Generate,
            Tick(now),
        )
    }

    #[test]
    fn same_tick_round_trip_has_zero_latency() {
        let mut l = MessageLedger::new();
        reg(&mut l, 1, 0, 10).unwrap();
        assert_eq!(
            l.deregister(EntityId(1), MessageId(0), Tick(10)),
            Ok(TickDuration::ZERO)
        );
        assert_eq!(l.in_flight(), 0);
    }

    #[test]
    fn double_register_is_rejected() {
        let mut l = MessageLedger::new();
        reg(&mut l, 1, 2, 0).unwrap();
        assert_eq!(
            reg(&mut l, 1, 2, 5),
            Err(LedgerError::AlreadyRegistered {
                receiver: EntityId(1),
                id: MessageId(2),
            })
        );
        // Same id at another receiver is a different key.
        assert!(reg(&mut l, 2, 2, 5).is_ok());
        assert_eq!(l.get(EntityId(1), MessageId(2)).unwrap().enqueued, Tick(0));
    }

    #[test]
    fn consuming_unknown_or_twice_is_rejected() {
        let mut l = MessageLedger::new();
        let missing = LedgerError::NotRegistered {
            receiver: EntityId(4),
            id: MessageId(9),
        };
        assert_eq!(l.deregister(EntityId(4), MessageId(9), Tick(1)), Err(missing));
        reg(&mut l, 4, 9, 0).unwrap();
        assert!(l.deregister(EntityId(4), MessageId(9), Tick(1)).is_ok());
        assert_eq!(l.deregister(EntityId(4), MessageId(9), Tick(2)), Err(missing));
    }

    #[test]
    fn averages_per_entity_and_global() {
        let mut l = MessageLedger::new();
        reg(&mut l, 1, 0, 0).unwrap();
        reg(&mut l, 1, 1, 0).unwrap();
        reg(&mut l, 2, 0, 0).unwrap();
        l.deregister(EntityId(1), MessageId(0), Tick(2)).unwrap();
        l.deregister(EntityId(1), MessageId(1), Tick(5)).unwrap();
        l.deregister(EntityId(2), MessageId(0), Tick(10)).unwrap();
        // (2 + 5) / 2 = 3 with integer division.
        assert_eq!(l.average_latency(EntityId(1)), 3);
        assert_eq!(l.average_latency(EntityId(2)), 10);
        assert_eq!(l.average_latency(EntityId(3)), 0);
        assert_eq!(l.average_global_latency(), 6);
        assert_eq!(l.stats(EntityId(1)).unwrap().count(), 2);
    }

    #[test]
    fn empty_ledger_reports_zero() {
        assert_eq!(MessageLedger::new().average_global_latency(), 0);
    }

    proptest! {
        #[test]
        fn latency_is_elapsed_ticks(start in 0u64..1_000_000, dt in 0u64..1_000_000) {
            let mut l = MessageLedger::new();
            reg(&mut l, 0, 0, start).unwrap();
            let latency = l.deregister(EntityId(0), MessageId(0), Tick(start + dt)).unwrap();
            prop_assert_eq!(latency, TickDuration(dt));
        }
    }
}
