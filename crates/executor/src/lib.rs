//! Batch execution for Conclave committees.
//!
//! Implements the [`BatchExecutor`](conclave_core::BatchExecutor) seam:
//! batches run against an opaque [`RuntimeHost`] on the blocking thread pool,
//! one cancellable task per runtime, delivering exactly one result on the
//! completion channel.

mod executor;
mod host;

pub use executor::HostExecutor;
pub use host::{HostError, RuntimeHost};
