//! Execution result types delivered on the completion channel.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Hash, RawBatch, Round};

/// Result of successfully executing a batch against the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedBatch {
    /// Round the batch was executed for.
    pub round: Round,

    /// I/O root over the batch inputs and outputs.
    pub io_root: Hash,

    /// State root after applying the batch.
    pub state_root: Hash,

    /// Per-transaction output payloads, in batch order.
    pub outputs: RawBatch,
}

/// Why an execution task stopped without a computed result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortCause {
    /// The driver cancelled the task (epoch change or shutdown).
    Cancelled,
    /// The runtime host reported a failure.
    RuntimeError(String),
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortCause::Cancelled => write!(f, "cancelled"),
            AbortCause::RuntimeError(e) => write!(f, "runtime error: {e}"),
        }
    }
}

/// What the execution task delivered on its completion channel.
///
/// Exactly one of these is sent per spawned task, success or not, so the
/// driver's cancel-and-wait always terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutput {
    /// Batch executed to completion.
    Computed(ComputedBatch),
    /// Batch execution stopped early; the round is finalized as failed.
    Aborted { round: Round, cause: AbortCause },
}

impl ExecutionOutput {
    /// Round this output belongs to.
    pub fn round(&self) -> Round {
        match self {
            ExecutionOutput::Computed(batch) => batch.round,
            ExecutionOutput::Aborted { round, .. } => *round,
        }
    }

    /// Whether this output carries a computed result.
    pub fn is_computed(&self) -> bool {
        matches!(self, ExecutionOutput::Computed(_))
    }
}
