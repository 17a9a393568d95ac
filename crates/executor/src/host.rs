//! Runtime host seam.
//!
//! The host is the opaque smart-contract runtime the committee executes
//! batches against. It is synchronous and CPU-bound; the executor schedules
//! it off the async event loop and handles cancellation around it.

use bytes::Bytes;
use thiserror::Error;

use conclave_types::{BlockHeader, Hash};

/// Errors reported by the runtime host.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    /// A transaction could not be executed.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// The host itself is unavailable or corrupted.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),
}

/// The opaque runtime a committee executes batches against.
///
/// Implementations wrap the actual contract engine. Methods are called from a
/// blocking worker thread, one transaction at a time, so implementations may
/// hold engine state without internal synchronization beyond `Send + Sync`.
pub trait RuntimeHost: Send + Sync + 'static {
    /// Execute one transaction against the state committed at `header`,
    /// returning its output payload.
    fn execute_transaction(&self, header: &BlockHeader, input: &Bytes) -> Result<Bytes, HostError>;

    /// State root after the transactions executed so far in this batch.
    fn state_root(&self) -> Hash;
}
