//! Collaborator seams: batch execution and round finalization.
//!
//! The state machine drives these but does not implement them. Production
//! wires in the runtime host executor and the chain client; tests wire in
//! scripted implementations.

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use conclave_types::{
    AbortCause, BlockHeader, ExecutionOutput, Round, RuntimeId, SignedBatch,
};

/// Handle to an in-flight batch execution task.
///
/// Owned by the `ProcessingBatch` state. The task delivers exactly one
/// [`ExecutionOutput`] on the completion channel, whether it ran to completion,
/// hit a runtime error, or observed cancellation — so [`cancel_and_wait`]
/// always terminates.
///
/// [`cancel_and_wait`]: ExecutionHandle::cancel_and_wait
#[derive(Debug)]
pub struct ExecutionHandle {
    round: Round,
    cancel: CancellationToken,
    done: oneshot::Receiver<ExecutionOutput>,
}

impl ExecutionHandle {
    /// Wrap a cancellation token and completion channel for a spawned task.
    pub fn new(
        round: Round,
        cancel: CancellationToken,
        done: oneshot::Receiver<ExecutionOutput>,
    ) -> Self {
        Self {
            round,
            cancel,
            done,
        }
    }

    /// Round the task is executing for.
    pub fn round(&self) -> Round {
        self.round
    }

    /// Await the completion channel without cancelling.
    ///
    /// A dropped sender (task panic) is mapped to an abort so the caller
    /// always gets an output.
    pub async fn completed(&mut self) -> ExecutionOutput {
        match (&mut self.done).await {
            Ok(output) => output,
            Err(_) => ExecutionOutput::Aborted {
                round: self.round,
                cause: AbortCause::RuntimeError("execution task dropped without a result".into()),
            },
        }
    }

    /// Signal cancellation, then block until the task delivers its output.
    ///
    /// The task must observe the token and exit promptly; the driver's state
    /// is not mutated again until this returns (no stale result can arrive
    /// after the state has moved on).
    pub async fn cancel_and_wait(mut self) -> ExecutionOutput {
        self.cancel.cancel();
        self.completed().await
    }
}

/// Spawns cancellable batch execution tasks against a runtime.
///
/// `spawn` must return immediately; the execution itself runs on an
/// independently scheduled task. At most one task exists per runtime at a
/// time — enforced structurally by the state machine, which only spawns from
/// states holding no prior handle.
pub trait BatchExecutor: Send + Sync + 'static {
    /// Spawn an execution task for `batch` against `target`'s round.
    fn spawn(&self, runtime: RuntimeId, target: &BlockHeader, batch: &SignedBatch)
        -> ExecutionHandle;
}

/// Outcome of submitting an execution result to the round finalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The submission was accepted; the chain will report the round finalized.
    Ok,
    /// Transient failure; re-submit after backoff.
    Retry,
    /// Permanent failure; the node can no longer safely certify results.
    Fatal,
}

/// Commits attested execution results to the chain.
#[async_trait]
pub trait RoundFinalizer: Send + Sync + 'static {
    /// Submit the result of `round` for this runtime.
    async fn finalize(
        &self,
        runtime: RuntimeId,
        round: Round,
        output: &ExecutionOutput,
    ) -> FinalizeOutcome;
}

/// Side effects requested by the state machine, executed by the driver.
///
/// Keeping submission (and its retry/backoff policy) outside the machine
/// matches the per-variant payload rule: `WaitingForFinalize` retains only
/// the batch start timestamp, while the submitted output lives with the
/// driver until the outcome is known.
#[derive(Debug)]
pub enum Effect {
    /// Submit `output` to the round finalizer.
    Finalize {
        round: Round,
        output: ExecutionOutput,
    },
}
