//! Events processed by the committee state machine.

use conclave_types::{
    BlockHeader, CommitteeRole, DiscrepancyEvent, EpochId, ExecutionOutput, Round, SignedBatch,
};

/// All events a runtime's committee state machine can receive.
///
/// Events are **passive data** — they describe something that happened. The
/// four external sources (epoch ticker, block watcher, batch scheduler,
/// discrepancy feed) and the internal completion signal are serialized into
/// one ordered stream per runtime by the event router; the state machine
/// never sees concurrent deliveries.
#[derive(Debug)]
pub enum CommitteeEvent {
    /// Committee membership for a new epoch.
    ///
    /// `role` is `None` when this node was not elected to the runtime's
    /// committee for `epoch`.
    EpochTransition {
        epoch: EpochId,
        role: Option<CommitteeRole>,
    },

    /// A block for this runtime was committed on chain.
    ///
    /// Delivered once per committed round, strictly increasing round numbers.
    BlockSeen { header: BlockHeader },

    /// The transaction scheduler dispatched a batch for execution.
    ///
    /// `target` is the header the scheduler built the batch against; the
    /// signatures inside `batch` were verified by the delivering collaborator.
    BatchReceived {
        batch: SignedBatch,
        target: BlockHeader,
    },

    /// Discrepancy-detection notification from the roothash feed.
    Discrepancy(DiscrepancyEvent),

    /// The spawned execution task delivered its result.
    ///
    /// Internal: fed back by the driver when the completion channel fires,
    /// never by an external producer.
    ExecutionComplete { output: ExecutionOutput },

    /// The chain finalized a round this node submitted a result for.
    RoundFinalized { round: Round },
}

impl CommitteeEvent {
    /// Get the event type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            CommitteeEvent::EpochTransition { .. } => "EpochTransition",
            CommitteeEvent::BlockSeen { .. } => "BlockSeen",
            CommitteeEvent::BatchReceived { .. } => "BatchReceived",
            CommitteeEvent::Discrepancy(_) => "Discrepancy",
            CommitteeEvent::ExecutionComplete { .. } => "ExecutionComplete",
            CommitteeEvent::RoundFinalized { .. } => "RoundFinalized",
        }
    }
}
