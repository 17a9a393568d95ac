//! Producer-side event routing.
//!
//! Each runtime has one serialized event queue. The four external sources
//! (epoch ticker, block watcher, batch receiver, discrepancy feed) and the
//! chain's finalization feed each hold a cloned [`CommitteeHandle`] and push
//! concurrently; the single driver task drains the queue, so the state
//! machine itself never sees concurrent deliveries.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use conclave_core::CommitteeEvent;
use conclave_types::{
    BlockHeader, CommitteeRole, DiscrepancyEvent, EpochId, Round, RuntimeId, SignedBatch,
};

/// Error pushing an event to a runtime's queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The driver task for this runtime has stopped.
    #[error("committee driver for runtime {runtime} is gone")]
    DriverGone {
        /// Runtime whose driver is gone.
        runtime: RuntimeId,
    },
}

/// Cloneable producer handle for one runtime's event queue.
#[derive(Debug, Clone)]
pub struct CommitteeHandle {
    runtime: RuntimeId,
    tx: mpsc::UnboundedSender<CommitteeEvent>,
}

impl CommitteeHandle {
    pub(crate) fn new(runtime: RuntimeId, tx: mpsc::UnboundedSender<CommitteeEvent>) -> Self {
        Self { runtime, tx }
    }

    /// Runtime this handle routes to.
    pub fn runtime(&self) -> RuntimeId {
        self.runtime
    }

    /// Deliver a committee membership update for a new epoch.
    pub fn epoch_transition(
        &self,
        epoch: EpochId,
        role: Option<CommitteeRole>,
    ) -> Result<(), RouterError> {
        self.send(CommitteeEvent::EpochTransition { epoch, role })
    }

    /// Deliver a committed block header.
    pub fn block_seen(&self, header: BlockHeader) -> Result<(), RouterError> {
        self.send(CommitteeEvent::BlockSeen { header })
    }

    /// Deliver a scheduled batch. Signatures must already be verified.
    pub fn batch_received(
        &self,
        batch: SignedBatch,
        target: BlockHeader,
    ) -> Result<(), RouterError> {
        self.send(CommitteeEvent::BatchReceived { batch, target })
    }

    /// Deliver a discrepancy-detection notification.
    pub fn discrepancy(&self, round: Round, confirmed: bool) -> Result<(), RouterError> {
        self.send(CommitteeEvent::Discrepancy(DiscrepancyEvent {
            round,
            confirmed,
        }))
    }

    /// Deliver the chain's notification that a round was finalized.
    pub fn round_finalized(&self, round: Round) -> Result<(), RouterError> {
        self.send(CommitteeEvent::RoundFinalized { round })
    }

    fn send(&self, event: CommitteeEvent) -> Result<(), RouterError> {
        trace!(runtime = %self.runtime, event = event.type_name(), "routing event");
        self.tx.send(event).map_err(|_| RouterError::DriverGone {
            runtime: self.runtime,
        })
    }
}
