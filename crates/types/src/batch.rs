//! Transaction batch types.
//!
//! A batch is an ordered sequence of opaque transaction payloads scheduled for
//! one round. Its identity is the I/O root hash computed over the inputs,
//! attested by storage nodes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Hash, Signature, TraceContext};

/// Ordered sequence of opaque transaction payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawBatch(pub Vec<Bytes>);

impl RawBatch {
    /// Number of transactions in the batch.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the batch contains no transactions.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compute the I/O root over the batch inputs.
    pub fn io_root(&self) -> Hash {
        let parts: Vec<&[u8]> = self.0.iter().map(|tx| tx.as_ref()).collect();
        Hash::from_parts(&parts)
    }
}

impl FromIterator<Bytes> for RawBatch {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        RawBatch(iter.into_iter().collect())
    }
}

/// A batch as delivered by the transaction scheduler.
///
/// The scheduler signature and the storage attestations over the I/O root are
/// verified by the delivering collaborator before this struct is constructed;
/// the committee layer retains them for the finalize payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedBatch {
    /// I/O root hash committing to the batch inputs.
    pub io_root: Hash,

    /// The transaction payloads.
    pub batch: RawBatch,

    /// Transaction scheduler's signature over the dispatch.
    pub scheduler_sig: Signature,

    /// Storage node attestations over the I/O root.
    pub storage_sigs: Vec<Signature>,

    /// Trace context linking this batch's spans across nodes.
    pub trace: TraceContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_root_covers_every_transaction() {
        let a: RawBatch = [Bytes::from_static(b"tx1"), Bytes::from_static(b"tx2")]
            .into_iter()
            .collect();
        let b: RawBatch = [Bytes::from_static(b"tx1"), Bytes::from_static(b"tx3")]
            .into_iter()
            .collect();
        assert_ne!(a.io_root(), b.io_root());
    }

    #[test]
    fn test_empty_batch() {
        let batch = RawBatch::default();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }
}
