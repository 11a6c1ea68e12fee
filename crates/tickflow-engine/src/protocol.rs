//! Messages exchanged between entities.
//!
//! The stream protocol is a credit handshake: a producer opens a path,
//! the consumer answers with initial credit, batches flow downstream and
//! every completed batch may be answered with more credit.

use std::fmt;

use tickflow_core::{BatchId, PathId, Tick};

/// Payload of one mailbox entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// A producer asks to open `path`.
    Open {
        /// The new edge.
        path: PathId,
    },
    /// The consumer accepts `path` and grants its first credit.
    AckOpen {
        /// The accepted edge.
        path: PathId,
        /// Items the producer may send right away.
        initial_credit: u64,
        /// Preferred items per batch.
        desired_batch_size: u64,
    },
    /// A batch of items travelling downstream.
    Batch {
        /// Edge the batch travels on.
        path: PathId,
        /// Per-path sequence number.
        id: BatchId,
        /// Number of items.
        size: u64,
        /// When the producer emitted the batch.
        enqueued: Tick,
    },
    /// Additional credit travelling upstream.
    AckBatch {
        /// Edge the credit applies to.
        path: PathId,
        /// Last batch the consumer has seen on this path.
        acknowledged_id: Option<BatchId>,
        /// Additional items the producer may send.
        new_credit: u64,
        /// Preferred items per batch.
        desired_batch_size: u64,
    },
    /// A control-cycle timer fired.
    CycleTimeout {
        /// Timer sequence number.
        nr: u64,
    },
    /// A source should generate more items.
    Generate,
    /// Opaque application payload.
    Custom(String),
}

impl Message {
    /// Whether the message belongs to the stream protocol.
    pub fn is_stream(&self) -> bool {
        matches!(
            self,
            Self::Open { .. } | Self::AckOpen { .. } | Self::Batch { .. } | Self::AckBatch { .. }
        )
    }

    /// Short rendering for mailbox views.
    pub fn describe(&self) -> String {
        match self {
            Self::Open { path } => format!("open path {path}"),
            Self::AckOpen { initial_credit, .. } => {
                format!("ack_open with {initial_credit} credit")
            }
            Self::Batch { id, size, .. } => format!("batch #{id} of size {size}"),
            Self::AckBatch {
                acknowledged_id,
                new_credit,
                ..
            } => match acknowledged_id {
                Some(id) => format!("ack_batch #{id} with {new_credit} new credit"),
                None => format!("ack_batch with {new_credit} new credit"),
            },
            Self::CycleTimeout { nr } => format!("cycle timeout #{nr}"),
            Self::Generate => "generate".to_string(),
            Self::Custom(s) => s.clone(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
