//! Cancellable batch execution tasks.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use conclave_core::{BatchExecutor, ExecutionHandle};
use conclave_types::{
    AbortCause, BlockHeader, ComputedBatch, ExecutionOutput, RawBatch, RuntimeId, SignedBatch,
};

use crate::host::RuntimeHost;

/// [`BatchExecutor`] that runs batches against a [`RuntimeHost`] on the
/// blocking thread pool.
///
/// One execution task exists per runtime at a time (the state machine only
/// spawns from states holding no prior handle), so a dedicated pool is not
/// needed; `spawn_blocking` keeps the CPU-bound host work off the async
/// event loop.
///
/// Cancellation is cooperative: the worker checks the token between
/// transactions and exits with an `Aborted` output, so the driver's
/// cancel-and-wait terminates promptly even mid-batch.
pub struct HostExecutor<H> {
    host: Arc<H>,
}

impl<H: RuntimeHost> HostExecutor<H> {
    /// Wrap a runtime host.
    pub fn new(host: Arc<H>) -> Self {
        Self { host }
    }
}

impl<H: RuntimeHost> BatchExecutor for HostExecutor<H> {
    fn spawn(
        &self,
        runtime: RuntimeId,
        target: &BlockHeader,
        batch: &SignedBatch,
    ) -> ExecutionHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let (done_tx, done_rx) = oneshot::channel();
        let host = self.host.clone();
        let target = target.clone();
        let inputs = batch.batch.clone();
        let round = target.round;

        tokio::task::spawn_blocking(move || {
            let output = run_batch(host.as_ref(), runtime, &target, &inputs, &token);
            // The receiver is only dropped when the whole state machine is
            // torn down; nothing to do then.
            let _ = done_tx.send(output);
        });

        ExecutionHandle::new(round, cancel, done_rx)
    }
}

/// Execute the batch transaction by transaction, observing cancellation
/// between transactions.
fn run_batch<H: RuntimeHost>(
    host: &H,
    runtime: RuntimeId,
    target: &BlockHeader,
    inputs: &RawBatch,
    cancel: &CancellationToken,
) -> ExecutionOutput {
    let round = target.round;
    let mut outputs = Vec::with_capacity(inputs.len());

    for (index, input) in inputs.0.iter().enumerate() {
        if cancel.is_cancelled() {
            debug!(%runtime, %round, executed = index, "batch execution cancelled");
            return ExecutionOutput::Aborted {
                round,
                cause: AbortCause::Cancelled,
            };
        }
        match host.execute_transaction(target, input) {
            Ok(output) => outputs.push(output),
            Err(err) => {
                // A host failure poisons the whole batch: partial output
                // roots cannot be attested.
                warn!(%runtime, %round, index, error = %err, "batch execution failed");
                return ExecutionOutput::Aborted {
                    round,
                    cause: AbortCause::RuntimeError(err.to_string()),
                };
            }
        }
    }

    // The I/O root commits to inputs and outputs together.
    let io_root = {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(inputs.len() + outputs.len());
        parts.extend(inputs.0.iter().map(|b| b.as_ref()));
        parts.extend(outputs.iter().map(|b: &bytes::Bytes| b.as_ref()));
        conclave_types::Hash::from_parts(&parts)
    };

    ExecutionOutput::Computed(ComputedBatch {
        round,
        io_root,
        state_root: host.state_root(),
        outputs: RawBatch(outputs),
    })
}
