//! The producer side of flow control.
//!
//! A [`Scatterer`] buffers produced items and broadcasts them to every
//! outbound path as batches, never emitting more than the smallest open
//! credit across paths.

use indexmap::IndexMap;
use tickflow_core::{BatchId, EntityId, PathId, Tick};

use crate::path::OutboundPath;

/// A batch ready to be sent downstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutgoingBatch {
    /// Path the batch travels on.
    pub path: PathId,
    /// Consumer at the far end.
    pub to: EntityId,
    /// Per-path batch sequence number.
    pub id: BatchId,
    /// Items in the batch.
    pub size: u64,
}

/// Buffered output and outbound paths of one producer.
#[derive(Clone, Debug)]
pub struct Scatterer {
    paths: IndexMap<PathId, OutboundPath>,
    buffered: u64,
    min_batch_size: u64,
    max_batch_size: u64,
}

impl Scatterer {
    /// Create a scatterer emitting batches of `min_batch_size..=max_batch_size`
    /// items (short batches only when forced).
    pub fn new(min_batch_size: u64, max_batch_size: u64) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            paths: IndexMap::new(),
            buffered: 0,
            min_batch_size: min_batch_size.clamp(1, max_batch_size),
            max_batch_size,
        }
    }

    /// Register an outbound path. It holds no credit until granted.
    pub fn add_path(&mut self, id: PathId, to: EntityId) {
        self.paths
            .entry(id)
            .or_insert_with(|| OutboundPath::new(id, to));
    }

    /// Close an outbound path.
    pub fn remove_path(&mut self, id: PathId) -> Option<OutboundPath> {
        self.paths.shift_remove(&id)
    }

    /// One outbound path.
    pub fn path(&self, id: PathId) -> Option<&OutboundPath> {
        self.paths.get(&id)
    }

    /// All outbound paths in the order they were opened.
    pub fn paths(&self) -> impl Iterator<Item = &OutboundPath> {
        self.paths.values()
    }

    /// Apply credit granted by a consumer. Returns `false` for unknown paths.
    pub fn grant(&mut self, id: PathId, credit: u64, desired_batch_size: Option<u64>) -> bool {
        match self.paths.get_mut(&id) {
            Some(p) => {
                p.grant(credit, desired_batch_size);
                true
            }
            None => false,
        }
    }

    /// Items that may still be emitted: the smallest open credit across
    /// paths, or zero without paths.
    pub fn credit(&self) -> u64 {
        self.paths.values().map(|p| p.open_credit).min().unwrap_or(0)
    }

    /// Items produced but not yet emitted.
    pub fn buffered(&self) -> u64 {
        self.buffered
    }

    /// Smallest batch emitted without forcing.
    pub fn min_batch_size(&self) -> u64 {
        self.min_batch_size
    }

    /// Largest batch ever emitted.
    pub fn max_batch_size(&self) -> u64 {
        self.max_batch_size
    }

    /// Items that may be produced without overrunning the credit.
    pub fn headroom(&self) -> u64 {
        self.credit().saturating_sub(self.buffered)
    }

    /// Add produced items to the buffer.
    pub fn push(&mut self, items: u64) {
        self.buffered += items;
    }

    /// Emit as many batches as credit allows.
    ///
    /// Batches smaller than `min_batch_size` are held back unless `force`
    /// is set. Every batch goes to every path.
    pub fn emit_batches(&mut self, now: Tick, force: bool) -> Vec<OutgoingBatch> {
        let mut out = Vec::new();
        let desired = self
            .paths
            .values()
            .map(|p| p.desired_batch_size)
            .min()
            .unwrap_or(u64::MAX);
        let limit = self.max_batch_size.min(desired).max(1);
        loop {
            let size = self.buffered.min(self.credit()).min(limit);
            if size == 0 || (size < self.min_batch_size && !force) {
                break;
            }
            for p in self.paths.values_mut() {
                let id = p.batch_sent(now, size);
                out.push(OutgoingBatch {
                    path: p.id,
                    to: p.to,
                    id,
                    size,
                });
            }
            self.buffered -= size;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_paths() -> Scatterer {
        let mut s = Scatterer::new(5, 20);
        s.add_path(PathId(0), EntityId(1));
        s.add_path(PathId(1), EntityId(2));
        s
    }

    #[test]
    fn credit_is_the_minimum_over_paths() {
        let mut s = two_paths();
        assert_eq!(s.credit(), 0);
        s.grant(PathId(0), 30, None);
        s.grant(PathId(1), 12, None);
        assert_eq!(s.credit(), 12);
        assert_eq!(Scatterer::new(1, 1).credit(), 0);
        assert!(!s.grant(PathId(7), 1, None));
    }

    #[test]
    fn batches_are_broadcast_and_spend_credit() {
        let mut s = two_paths();
        s.grant(PathId(0), 100, None);
        s.grant(PathId(1), 100, None);
        s.push(45);
        let out = s.emit_batches(Tick(7), false);
        // 20 + 20 emitted to both paths; 5 left is exactly min_batch_size.
        assert_eq!(out.iter().map(|b| b.size).collect::<Vec<_>>(), vec![20, 20, 20, 20, 5, 5]);
        assert_eq!(out[0].to, EntityId(1));
        assert_eq!(out[1].to, EntityId(2));
        assert_eq!(out[2].id, BatchId(1));
        assert_eq!(s.buffered(), 0);
        assert_eq!(s.credit(), 55);
        assert_eq!(s.path(PathId(0)).unwrap().last_rate(Tick(7)), 45);
    }

    #[test]
    fn short_batches_wait_unless_forced() {
        let mut s = two_paths();
        s.grant(PathId(0), 100, None);
        s.grant(PathId(1), 100, None);
        s.push(3);
        assert!(s.emit_batches(Tick(1), false).is_empty());
        assert_eq!(s.emit_batches(Tick(1), true).len(), 2);
    }

    #[test]
    fn consumer_hint_caps_batch_size() {
        let mut s = Scatterer::new(1, 100);
        s.add_path(PathId(0), EntityId(1));
        s.grant(PathId(0), 100, Some(8));
        s.push(20);
        let sizes: Vec<_> = s.emit_batches(Tick(0), false).iter().map(|b| b.size).collect();
        assert_eq!(sizes, vec![8, 8, 4]);
    }

    #[test]
    fn emission_stops_at_credit() {
        let mut s = Scatterer::new(1, 100);
        s.add_path(PathId(0), EntityId(1));
        s.grant(PathId(0), 10, None);
        s.push(25);
        assert_eq!(s.headroom(), 0);
        let out = s.emit_batches(Tick(0), true);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].size, 10);
        assert_eq!(s.buffered(), 15);
    }
}
