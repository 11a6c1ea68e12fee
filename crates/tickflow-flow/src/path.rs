//! Stream edges as seen from either end.

use tickflow_core::{BatchId, EntityId, PathId, Tick};

use crate::samples::ThroughputSamples;

/// The consumer's view of one stream edge.
///
/// Tracks how much credit the upstream producer currently holds and the
/// batch size the consumer would like to receive.
#[derive(Clone, Debug)]
pub struct InboundPath {
    /// Edge identifier.
    pub id: PathId,
    /// The producing entity.
    pub from: EntityId,
    /// Credit granted upstream and not yet spent on received batches.
    pub assigned_credit: u64,
    /// Credit the estimator last wanted the producer to hold. Differs from
    /// `assigned_credit` while a grant is held back by a credit cap.
    pub target_credit: u64,
    /// Preferred items per batch, forwarded upstream with each grant.
    pub desired_batch_size: u64,
    /// Last batch received on this path.
    pub last_batch_id: Option<BatchId>,
    /// Received `(timestamp, elements)` history.
    pub samples: ThroughputSamples,
}

impl InboundPath {
    /// A freshly opened path with no credit granted yet.
    pub fn new(id: PathId, from: EntityId, desired_batch_size: u64) -> Self {
        Self {
            id,
            from,
            assigned_credit: 0,
            target_credit: 0,
            desired_batch_size,
            last_batch_id: None,
            samples: ThroughputSamples::default(),
        }
    }

    /// Account for a received batch: the producer spent `size` credit.
    pub fn batch_received(&mut self, batch: BatchId, size: u64, now: Tick) {
        self.assigned_credit = self.assigned_credit.saturating_sub(size);
        self.last_batch_id = Some(batch);
        self.samples.push(now, size);
    }
}

/// The producer's view of one stream edge.
#[derive(Clone, Debug)]
pub struct OutboundPath {
    /// Edge identifier.
    pub id: PathId,
    /// The consuming entity.
    pub to: EntityId,
    /// Credit granted by the consumer and not yet spent.
    pub open_credit: u64,
    /// Upper bound on items per batch requested by the consumer.
    pub desired_batch_size: u64,
    /// Id the next emitted batch will carry.
    pub next_batch_id: BatchId,
    /// Sent `(timestamp, elements)` history.
    pub samples: ThroughputSamples,
}

impl OutboundPath {
    /// A path awaiting its initial credit.
    pub fn new(id: PathId, to: EntityId) -> Self {
        Self {
            id,
            to,
            open_credit: 0,
            desired_batch_size: u64::MAX,
            next_batch_id: BatchId(0),
            samples: ThroughputSamples::default(),
        }
    }

    /// Add credit granted by the consumer.
    pub fn grant(&mut self, credit: u64, desired_batch_size: Option<u64>) {
        self.open_credit = self.open_credit.saturating_add(credit);
        if let Some(hint) = desired_batch_size {
            self.desired_batch_size = hint.max(1);
        }
    }

    /// Record an emitted batch of `elements` items and return its id.
    ///
    /// # Panics
    ///
    /// Panics if `elements` exceeds the open credit; emitting without
    /// credit breaks the flow-control contract.
    pub fn batch_sent(&mut self, tstamp: Tick, elements: u64) -> BatchId {
        assert!(
            elements <= self.open_credit,
            "path {} emitted {elements} items with only {} credit",
            self.id,
            self.open_credit
        );
        self.open_credit -= elements;
        self.samples.push(tstamp, elements);
        let id = self.next_batch_id;
        self.next_batch_id = id.next();
        id
    }

    /// Elements sent during the last simulated second.
    pub fn last_rate(&self, now: Tick) -> u64 {
        self.samples.last_rate(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn received_batch_spends_assigned_credit() {
        let mut p = InboundPath::new(PathId(0), EntityId(1), 50);
        p.assigned_credit = 10;
        p.batch_received(BatchId(0), 4, Tick(3));
        assert_eq!(p.assigned_credit, 6);
        assert_eq!(p.last_batch_id, Some(BatchId(0)));
        // Over-delivery saturates instead of wrapping.
        p.batch_received(BatchId(1), 100, Tick(4));
        assert_eq!(p.assigned_credit, 0);
    }

    #[test]
    fn sent_batches_are_numbered_and_sampled() {
        let mut p = OutboundPath::new(PathId(2), EntityId(5));
        p.grant(10, Some(4));
        assert_eq!(p.desired_batch_size, 4);
        assert_eq!(p.batch_sent(Tick(1), 4), BatchId(0));
        assert_eq!(p.batch_sent(Tick(2), 4), BatchId(1));
        assert_eq!(p.open_credit, 2);
        assert_eq!(p.last_rate(Tick(2)), 8);
    }

    #[test]
    #[should_panic(expected = "emitted")]
    fn sending_without_credit_panics() {
        let mut p = OutboundPath::new(PathId(0), EntityId(0));
        p.batch_sent(Tick(0), 1);
    }
}
