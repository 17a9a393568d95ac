//! Block header type for the committee layer.

use serde::{Deserialize, Serialize};

use crate::{Hash, Round};

/// Header of a committed block.
///
/// The committee layer only needs the consensus metadata: chain position and
/// the root commitments the execution result must extend. Full block bodies
/// never reach this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Round this block was committed in. One header per round, strictly
    /// increasing.
    pub round: Round,

    /// Hash of the previous block header.
    pub previous_hash: Hash,

    /// State root commitment after this block.
    pub state_root: Hash,

    /// I/O root commitment for this block's inputs and outputs.
    pub io_root: Hash,

    /// Unix timestamp (milliseconds) when the block was committed.
    pub timestamp: u64,
}

impl BlockHeader {
    /// Compute the hash of this header.
    ///
    /// Hashes a fixed-layout encoding of the fields so the digest is stable
    /// across serde formats.
    pub fn hash(&self) -> Hash {
        Hash::from_parts(&[
            &self.round.0.to_le_bytes(),
            self.previous_hash.as_bytes(),
            self.state_root.as_bytes(),
            self.io_root.as_bytes(),
            &self.timestamp.to_le_bytes(),
        ])
    }

    /// Check if this is the genesis header.
    pub fn is_genesis(&self) -> bool {
        self.round.0 == 0
    }
}
