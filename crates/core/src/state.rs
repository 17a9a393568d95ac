//! Committee execution state machine.
//!
//! Tracks a node's role through an epoch and coordinates batch execution for
//! one runtime. Four independent event streams (epoch transitions, committed
//! blocks, scheduled batches, discrepancy notifications) arrive serialized
//! through the driver; this module decides which transitions are legal and
//! owns the lifecycle of the single in-flight execution task.
//!
//! # States
//!
//! ```text
//! NotReady ──epoch──▶ WaitingForBatch ──batch──▶ WaitingForBlock ─┐
//!                        │   ▲  │                                 block
//!                        │   │  └──batch (block current)──▶───────┤
//!                   discrepancy │                                 ▼
//!                     (stashed) │        backup ◀── WaitingForEvent
//!                        │      │                         │ discrepancy
//!                        ▼      │                         ▼
//!                        └──────┴── WaitingForFinalize ◀── ProcessingBatch
//! ```
//!
//! The state value is owned exclusively by the driver loop; `apply` is never
//! invoked concurrently.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use conclave_types::{
    BlockHeader, CommitteeRole, DiscrepancyEvent, EpochId, ExecutionOutput, Round, RuntimeId,
    SignedBatch,
};

use crate::error::StateError;
use crate::event::CommitteeEvent;
use crate::traits::{BatchExecutor, Effect, ExecutionHandle};

/// Symbolic state name without the attached values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateName {
    /// Not a member of the committee for the current epoch.
    NotReady,
    /// In the committee, no batch dispatched yet.
    WaitingForBatch,
    /// Batch received, waiting for the block it was built against.
    WaitingForBlock,
    /// Batch and block in hand, backup waiting for a discrepancy signal.
    WaitingForEvent,
    /// Execution task in flight.
    ProcessingBatch,
    /// Result submitted, waiting for the chain to finalize the round.
    WaitingForFinalize,
}

impl StateName {
    /// Static string form, used for logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            StateName::NotReady => "NotReady",
            StateName::WaitingForBatch => "WaitingForBatch",
            StateName::WaitingForBlock => "WaitingForBlock",
            StateName::WaitingForEvent => "WaitingForEvent",
            StateName::ProcessingBatch => "ProcessingBatch",
            StateName::WaitingForFinalize => "WaitingForFinalize",
        }
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Valid state transitions.
///
/// Exhaustive over `StateName` so adding a state forces this table to be
/// revisited. Anything not listed here is rejected by [`CommitteeState`]
/// regardless of how the handler code evolves.
pub fn transition_allowed(from: StateName, to: StateName) -> bool {
    use StateName::*;
    match from {
        // Epoch transition: either still out, or elected into the committee.
        NotReady => matches!(to, NotReady | WaitingForBatch),
        // Batch received (block current, block pending, or backup waiting),
        // or dropped from the committee.
        WaitingForBatch => matches!(
            to,
            WaitingForBatch | WaitingForBlock | ProcessingBatch | WaitingForEvent | NotReady
        ),
        // Awaited block seen, superseded by a newer block, or dropped.
        WaitingForBlock => matches!(
            to,
            WaitingForBatch | ProcessingBatch | WaitingForEvent | NotReady
        ),
        // Discrepancy confirmed, superseded, or dropped.
        WaitingForEvent => matches!(to, WaitingForBatch | ProcessingBatch | NotReady),
        // Execution must drain through finalize, even on epoch loss.
        ProcessingBatch => matches!(to, WaitingForFinalize),
        // Round finalized, or dropped from the committee.
        WaitingForFinalize => matches!(to, WaitingForBatch | NotReady),
    }
}

/// Payload of the `ProcessingBatch` state.
#[derive(Debug)]
pub struct ProcessingState {
    /// The batch being executed. The spawned task owns its own copy of the
    /// transaction data; this one is retained for telemetry and requeueing.
    pub batch: SignedBatch,
    /// Header the batch executes against.
    pub target: BlockHeader,
    /// When the execution task was spawned.
    pub started_at: Instant,
    /// Cancellation token plus single-fire completion channel.
    pub handle: ExecutionHandle,
}

/// A node's state for one (runtime, committee epoch) pairing.
///
/// Exactly one value exists per runtime; each variant carries only the data
/// relevant to that phase.
#[derive(Debug)]
pub enum NodeState {
    /// Not a committee member.
    NotReady,
    /// Ready for the scheduler's next dispatch.
    WaitingForBatch {
        /// Discrepancy notification that arrived before any batch. Re-delivered
        /// to the state that resumes discrepancy handling, never dropped.
        pending_event: Option<DiscrepancyEvent>,
    },
    /// Batch in hand, block not yet observed.
    WaitingForBlock {
        batch: SignedBatch,
        /// Header the batch was built against, awaited from the chain.
        awaited: BlockHeader,
        pending_event: Option<DiscrepancyEvent>,
    },
    /// Backup holding a ready batch, waiting for a primary-failure signal.
    WaitingForEvent {
        batch: SignedBatch,
        target: BlockHeader,
        pending_event: Option<DiscrepancyEvent>,
    },
    /// Execution task in flight.
    ProcessingBatch(ProcessingState),
    /// Result handed to the finalizer; retains timing for latency accounting.
    WaitingForFinalize { round: Round, started_at: Instant },
}

impl NodeState {
    /// Name of the state.
    pub fn name(&self) -> StateName {
        match self {
            NodeState::NotReady => StateName::NotReady,
            NodeState::WaitingForBatch { .. } => StateName::WaitingForBatch,
            NodeState::WaitingForBlock { .. } => StateName::WaitingForBlock,
            NodeState::WaitingForEvent { .. } => StateName::WaitingForEvent,
            NodeState::ProcessingBatch(_) => StateName::ProcessingBatch,
            NodeState::WaitingForFinalize { .. } => StateName::WaitingForFinalize,
        }
    }
}

/// Role-based execution policy.
///
/// The transition table fixes which states are reachable; whether a backup
/// waits for a confirmed discrepancy before executing is deployment policy.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionPolicy {
    /// When true (default), a backup enters `WaitingForEvent` on batch arrival
    /// and executes only after a confirmed discrepancy. When false, backups
    /// execute every batch immediately, like primaries.
    pub backup_waits_for_event: bool,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            backup_waits_for_event: true,
        }
    }
}

/// The committee execution state machine for one runtime.
pub struct CommitteeState {
    runtime: RuntimeId,
    epoch: EpochId,
    role: Option<CommitteeRole>,
    policy: ExecutionPolicy,
    state: NodeState,
    /// Latest committed header observed for this runtime.
    latest_header: Option<BlockHeader>,
    executor: Arc<dyn BatchExecutor>,
}

impl CommitteeState {
    /// Create a fresh state machine in `NotReady`.
    pub fn new(runtime: RuntimeId, executor: Arc<dyn BatchExecutor>, policy: ExecutionPolicy) -> Self {
        Self {
            runtime,
            epoch: EpochId::GENESIS,
            role: None,
            policy,
            state: NodeState::NotReady,
            latest_header: None,
            executor,
        }
    }

    /// Runtime this machine belongs to.
    pub fn runtime(&self) -> RuntimeId {
        self.runtime
    }

    /// Current symbolic state name.
    pub fn state_name(&self) -> StateName {
        self.state.name()
    }

    /// Current committee role, if any.
    pub fn role(&self) -> Option<CommitteeRole> {
        self.role
    }

    /// Current epoch.
    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    /// Latest committed round observed, if any block has been seen.
    pub fn latest_round(&self) -> Option<Round> {
        self.latest_header.as_ref().map(|h| h.round)
    }

    /// Await the in-flight execution's completion channel.
    ///
    /// Pends forever unless the machine is in `ProcessingBatch`; the driver
    /// selects over this and the event queue, observing completion before any
    /// queued event.
    pub async fn completion(&mut self) -> ExecutionOutput {
        match &mut self.state {
            NodeState::ProcessingBatch(ps) => ps.handle.completed().await,
            _ => std::future::pending().await,
        }
    }

    /// Apply one event, returning effects for the driver to execute.
    ///
    /// Never invoked concurrently: the driver serializes all deliveries. On
    /// error the state is unchanged (fail-closed). The only awaiting path is
    /// cancel-and-wait when an epoch transition interrupts `ProcessingBatch`.
    pub async fn apply(&mut self, event: CommitteeEvent) -> Result<Vec<Effect>, StateError> {
        match event {
            CommitteeEvent::EpochTransition { epoch, role } => {
                self.on_epoch_transition(epoch, role).await
            }
            CommitteeEvent::BlockSeen { header } => self.on_block(header),
            CommitteeEvent::BatchReceived { batch, target } => self.on_batch(batch, target),
            CommitteeEvent::Discrepancy(ev) => self.on_discrepancy(ev),
            CommitteeEvent::ExecutionComplete { output } => self.on_execution_complete(output),
            CommitteeEvent::RoundFinalized { round } => self.on_round_finalized(round),
        }
    }

    // ── Event handlers ───────────────────────────────────────────────

    async fn on_epoch_transition(
        &mut self,
        epoch: EpochId,
        role: Option<CommitteeRole>,
    ) -> Result<Vec<Effect>, StateError> {
        let new_epoch = epoch != self.epoch;
        match role {
            None => {
                if let NodeState::ProcessingBatch(_) = self.state {
                    // In-flight execution must drain through WaitingForFinalize
                    // before the state can reach NotReady; the spawned task and
                    // its completion channel are reclaimed, never leaked.
                    self.drain_processing("left committee").await;
                    self.enter(NodeState::NotReady)?;
                } else {
                    self.enter(NodeState::NotReady)?;
                }
                if self.role.is_some() {
                    info!(runtime = %self.runtime, %epoch, "no longer in committee");
                }
                self.role = None;
            }
            Some(r) => {
                match &self.state {
                    NodeState::NotReady => {
                        info!(runtime = %self.runtime, %epoch, role = %r, "joined committee");
                        self.enter(NodeState::WaitingForBatch {
                            pending_event: None,
                        })?;
                    }
                    NodeState::WaitingForBatch { .. } if !new_epoch => {
                        // Re-announcement of the current membership.
                        debug!(runtime = %self.runtime, %epoch, "epoch re-entry, already waiting for batch");
                    }
                    NodeState::WaitingForBatch { .. } => {
                        // New epoch: any stashed event belongs to the old
                        // committee assignment.
                        self.enter(NodeState::WaitingForBatch {
                            pending_event: None,
                        })?;
                    }
                    NodeState::WaitingForBlock { .. } | NodeState::WaitingForEvent { .. } => {
                        if new_epoch {
                            // The stored batch was scheduled under the previous
                            // epoch's committee; discard it.
                            conclave_metrics::record_batch_discarded("epoch_transition");
                            warn!(runtime = %self.runtime, %epoch, "discarding stored batch on epoch transition");
                            self.enter(NodeState::WaitingForBatch {
                                pending_event: None,
                            })?;
                        }
                    }
                    NodeState::ProcessingBatch(_) => {
                        if new_epoch {
                            self.drain_processing("epoch transition").await;
                            self.enter(NodeState::WaitingForBatch {
                                pending_event: None,
                            })?;
                        }
                    }
                    NodeState::WaitingForFinalize { .. } => {
                        // The submitted round may still finalize; keep waiting.
                    }
                }
                self.role = Some(r);
            }
        }
        self.epoch = epoch;
        Ok(Vec::new())
    }

    fn on_batch(
        &mut self,
        batch: SignedBatch,
        target: BlockHeader,
    ) -> Result<Vec<Effect>, StateError> {
        if !matches!(self.state, NodeState::WaitingForBatch { .. }) {
            return Err(self.unexpected("BatchReceived"));
        }
        if let Some(latest) = self.latest_round() {
            if target.round < latest {
                conclave_metrics::record_stale_event("BatchReceived");
                return Err(StateError::StaleEvent {
                    round: target.round,
                    latest,
                });
            }
        }

        debug!(
            runtime = %self.runtime,
            round = %target.round,
            txs = batch.batch.len(),
            io_root = %batch.io_root,
            "batch received"
        );

        let NodeState::WaitingForBatch { pending_event } =
            std::mem::replace(&mut self.state, NodeState::NotReady)
        else {
            unreachable!("state checked above");
        };

        if self.latest_round() == Some(target.round) {
            // Block already in hand; branch on role and any stashed event.
            self.dispatch_ready_batch(StateName::WaitingForBatch, batch, target, pending_event)
        } else {
            // Need to catch up to the target block first; it is fetched
            // separately by the block watcher.
            self.install(
                StateName::WaitingForBatch,
                NodeState::WaitingForBlock {
                    batch,
                    awaited: target,
                    pending_event,
                },
            )?;
            Ok(Vec::new())
        }
    }

    fn on_block(&mut self, header: BlockHeader) -> Result<Vec<Effect>, StateError> {
        if let Some(latest) = self.latest_round() {
            if header.round <= latest {
                conclave_metrics::record_stale_event("BlockSeen");
                return Err(StateError::StaleEvent {
                    round: header.round,
                    latest,
                });
            }
        }
        let round = header.round;
        self.latest_header = Some(header.clone());

        match &self.state {
            NodeState::WaitingForBlock { awaited, .. } => {
                if round == awaited.round && header.hash() == awaited.hash() {
                    let NodeState::WaitingForBlock {
                        batch,
                        awaited,
                        pending_event,
                    } = std::mem::replace(&mut self.state, NodeState::NotReady)
                    else {
                        unreachable!("state checked above");
                    };
                    self.dispatch_ready_batch(
                        StateName::WaitingForBlock,
                        batch,
                        awaited,
                        pending_event,
                    )
                } else if round >= awaited.round {
                    // The awaited round was skipped or committed differently;
                    // the stored batch no longer applies.
                    conclave_metrics::record_batch_discarded("superseded");
                    warn!(
                        runtime = %self.runtime,
                        awaited = %awaited.round,
                        seen = %round,
                        "stored batch superseded by newer block"
                    );
                    let NodeState::WaitingForBlock { pending_event, .. } =
                        std::mem::replace(&mut self.state, NodeState::NotReady)
                    else {
                        unreachable!("state checked above");
                    };
                    self.install(
                        StateName::WaitingForBlock,
                        NodeState::WaitingForBatch {
                            pending_event: pending_event.filter(|ev| ev.round > round),
                        },
                    )?;
                    Ok(Vec::new())
                } else {
                    // Still catching up to the awaited round.
                    Ok(Vec::new())
                }
            }
            NodeState::WaitingForEvent { target, .. } => {
                if round > target.round {
                    // The round we were primed to re-execute has been
                    // superseded; the discrepancy window is over.
                    conclave_metrics::record_batch_discarded("superseded");
                    let NodeState::WaitingForEvent { pending_event, .. } =
                        std::mem::replace(&mut self.state, NodeState::NotReady)
                    else {
                        unreachable!("state checked above");
                    };
                    self.install(
                        StateName::WaitingForEvent,
                        NodeState::WaitingForBatch {
                            pending_event: pending_event.filter(|ev| ev.round > round),
                        },
                    )?;
                }
                Ok(Vec::new())
            }
            // Blocks are ambient chain observation in every other state; the
            // header was recorded above and nothing else changes.
            _ => Ok(Vec::new()),
        }
    }

    fn on_discrepancy(&mut self, ev: DiscrepancyEvent) -> Result<Vec<Effect>, StateError> {
        match &mut self.state {
            NodeState::WaitingForBatch { pending_event } => {
                // Arrived before the batch: stash for the state that resumes
                // discrepancy handling.
                debug!(runtime = %self.runtime, round = %ev.round, confirmed = ev.confirmed, "stashing early discrepancy event");
                *pending_event = Some(ev);
                Ok(Vec::new())
            }
            NodeState::WaitingForBlock { pending_event, .. } => {
                // Batch in hand but block still pending: same early-arrival
                // handling, consumed once the block lands.
                debug!(runtime = %self.runtime, round = %ev.round, confirmed = ev.confirmed, "stashing discrepancy event until block arrives");
                *pending_event = Some(ev);
                Ok(Vec::new())
            }
            NodeState::WaitingForEvent { target, .. } => {
                if !ev.confirmed {
                    debug!(runtime = %self.runtime, round = %ev.round, "ignoring unconfirmed discrepancy event");
                    return Ok(Vec::new());
                }
                if ev.round < target.round {
                    conclave_metrics::record_stale_event("Discrepancy");
                    return Err(StateError::StaleEvent {
                        round: ev.round,
                        latest: target.round,
                    });
                }
                if ev.round > target.round {
                    // Signal for a future round; remember it but keep waiting.
                    let NodeState::WaitingForEvent { pending_event, .. } = &mut self.state else {
                        unreachable!("state checked above");
                    };
                    *pending_event = Some(ev);
                    return Ok(Vec::new());
                }
                info!(runtime = %self.runtime, round = %ev.round, "discrepancy confirmed, promoting backup to execute");
                let NodeState::WaitingForEvent { batch, target, .. } =
                    std::mem::replace(&mut self.state, NodeState::NotReady)
                else {
                    unreachable!("state checked above");
                };
                let effects = self.start_processing(StateName::WaitingForEvent, batch, target)?;
                Ok(effects)
            }
            _ => Err(self.unexpected("Discrepancy")),
        }
    }

    fn on_execution_complete(&mut self, output: ExecutionOutput) -> Result<Vec<Effect>, StateError> {
        let NodeState::ProcessingBatch(_) = self.state else {
            return Err(self.unexpected("ExecutionComplete"));
        };
        let NodeState::ProcessingBatch(ps) =
            std::mem::replace(&mut self.state, NodeState::NotReady)
        else {
            unreachable!("state checked above");
        };
        let round = ps.target.round;
        let elapsed = ps.started_at.elapsed();
        if output.round() != round {
            warn!(
                runtime = %self.runtime,
                expected = %round,
                got = %output.round(),
                "execution output round mismatch"
            );
        }
        conclave_metrics::record_batch_execution(elapsed.as_secs_f64(), output.is_computed());
        match &output {
            ExecutionOutput::Computed(batch) => {
                info!(
                    runtime = %self.runtime,
                    round = %round,
                    elapsed_ms = elapsed.as_millis() as u64,
                    state_root = %batch.state_root,
                    "batch execution complete"
                );
            }
            ExecutionOutput::Aborted { cause, .. } => {
                warn!(
                    runtime = %self.runtime,
                    round = %round,
                    %cause,
                    "batch execution aborted, finalizing round as failed"
                );
            }
        }
        self.install(
            StateName::ProcessingBatch,
            NodeState::WaitingForFinalize {
                round,
                started_at: ps.started_at,
            },
        )?;
        Ok(vec![Effect::Finalize { round, output }])
    }

    fn on_round_finalized(&mut self, round: Round) -> Result<Vec<Effect>, StateError> {
        let NodeState::WaitingForFinalize {
            round: submitted,
            started_at,
        } = &self.state
        else {
            return Err(self.unexpected("RoundFinalized"));
        };
        let (submitted, started_at) = (*submitted, *started_at);
        if round != submitted {
            conclave_metrics::record_stale_event("RoundFinalized");
            return Err(StateError::StaleEvent {
                round,
                latest: submitted,
            });
        }
        conclave_metrics::record_round_finalized(started_at.elapsed().as_secs_f64());
        info!(runtime = %self.runtime, round = %round, "round finalized");
        if self.role.is_some() {
            self.enter(NodeState::WaitingForBatch {
                pending_event: None,
            })?;
        } else {
            // Membership was lost while the finalize was in flight.
            self.enter(NodeState::NotReady)?;
        }
        Ok(Vec::new())
    }

    // ── Transition plumbing ──────────────────────────────────────────

    /// Move to `next` from the current state, enforcing the transition table.
    fn enter(&mut self, next: NodeState) -> Result<(), StateError> {
        let from = self.state.name();
        self.check(from, next.name())?;
        self.note_transition(from, next.name());
        self.state = next;
        Ok(())
    }

    /// Move to `next` after the previous state's payload was consumed.
    ///
    /// Callers take the old state by value (leaving a placeholder) before
    /// building `next` from its payload; `from` names the consumed state.
    fn install(&mut self, from: StateName, next: NodeState) -> Result<(), StateError> {
        self.check(from, next.name())?;
        self.note_transition(from, next.name());
        self.state = next;
        Ok(())
    }

    fn check(&self, from: StateName, to: StateName) -> Result<(), StateError> {
        if transition_allowed(from, to) {
            Ok(())
        } else {
            Err(StateError::InvalidTransition { from, to })
        }
    }

    fn note_transition(&self, from: StateName, to: StateName) {
        debug!(runtime = %self.runtime, %from, %to, "state transition");
        conclave_metrics::record_state_transition(from.as_str(), to.as_str());
    }

    fn unexpected(&self, event: &'static str) -> StateError {
        conclave_metrics::record_invalid_transition(self.state.name().as_str(), event);
        StateError::UnexpectedEvent {
            state: self.state.name(),
            event,
        }
    }

    /// Branch a ready batch (block in hand) into execution or the backup wait,
    /// consuming a stashed discrepancy event where it applies.
    fn dispatch_ready_batch(
        &mut self,
        from: StateName,
        batch: SignedBatch,
        target: BlockHeader,
        pending_event: Option<DiscrepancyEvent>,
    ) -> Result<Vec<Effect>, StateError> {
        let confirmed_for_target = pending_event
            .as_ref()
            .is_some_and(|ev| ev.confirmed && ev.round == target.round);
        let execute_now = match self.role {
            Some(CommitteeRole::Primary) => true,
            Some(CommitteeRole::Backup) => {
                !self.policy.backup_waits_for_event || confirmed_for_target
            }
            // Only committee members hold batches; the table rejects the rest.
            None => false,
        };

        if execute_now {
            if confirmed_for_target {
                conclave_metrics::record_pending_event_consumed();
                debug!(runtime = %self.runtime, round = %target.round, "consumed stashed discrepancy event");
            }
            self.start_processing(from, batch, target)
        } else {
            let target_round = target.round;
            self.install(
                from,
                NodeState::WaitingForEvent {
                    batch,
                    target,
                    // An unconsumed stash may still matter for a later round.
                    pending_event: pending_event.filter(|ev| ev.round > target_round),
                },
            )?;
            Ok(Vec::new())
        }
    }

    /// Spawn the execution task and enter `ProcessingBatch`.
    fn start_processing(
        &mut self,
        from: StateName,
        batch: SignedBatch,
        target: BlockHeader,
    ) -> Result<Vec<Effect>, StateError> {
        self.check(from, StateName::ProcessingBatch)?;
        info!(
            runtime = %self.runtime,
            round = %target.round,
            txs = batch.batch.len(),
            "starting batch execution"
        );
        let handle = self.executor.spawn(self.runtime, &target, &batch);
        self.install(
            from,
            NodeState::ProcessingBatch(ProcessingState {
                batch,
                target,
                started_at: Instant::now(),
                handle,
            }),
        )?;
        Ok(Vec::new())
    }

    /// Cancel the in-flight execution and block until it drains, passing
    /// through `WaitingForFinalize` so the table ordering is preserved.
    ///
    /// The result is dropped: this path only runs when the node leaves its
    /// assignment, and such a node can no longer certify the round.
    async fn drain_processing(&mut self, reason: &'static str) {
        let NodeState::ProcessingBatch(ps) =
            std::mem::replace(&mut self.state, NodeState::NotReady)
        else {
            // Callers match on ProcessingBatch first.
            return;
        };
        let round = ps.target.round;
        info!(runtime = %self.runtime, round = %round, reason, "cancelling in-flight batch execution");
        let output = ps.handle.cancel_and_wait().await;
        conclave_metrics::record_execution_cancelled();
        conclave_metrics::record_batch_execution(
            ps.started_at.elapsed().as_secs_f64(),
            output.is_computed(),
        );
        self.note_transition(StateName::ProcessingBatch, StateName::WaitingForFinalize);
        self.state = NodeState::WaitingForFinalize {
            round,
            started_at: ps.started_at,
        };
    }
}

impl fmt::Debug for CommitteeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitteeState")
            .field("runtime", &self.runtime)
            .field("epoch", &self.epoch)
            .field("role", &self.role)
            .field("state", &self.state.name())
            .field("latest_round", &self.latest_round())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use conclave_types::{AbortCause, ComputedBatch, Hash, RawBatch, Signature, TraceContext, ValidatorId};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    fn runtime_id() -> RuntimeId {
        RuntimeId::from_bytes([7u8; 32])
    }

    fn header(round: u64) -> BlockHeader {
        BlockHeader {
            round: Round(round),
            previous_hash: Hash::ZERO,
            state_root: Hash::from_bytes(&round.to_le_bytes()),
            io_root: Hash::ZERO,
            timestamp: 1_700_000_000_000 + round,
        }
    }

    fn signed_batch(txs: &[&'static [u8]]) -> SignedBatch {
        let batch: RawBatch = txs.iter().map(|tx| Bytes::from_static(tx)).collect();
        SignedBatch {
            io_root: batch.io_root(),
            batch,
            scheduler_sig: Signature::new(ValidatorId(0), vec![0u8; 64]),
            storage_sigs: vec![Signature::new(ValidatorId(1), vec![1u8; 64])],
            trace: TraceContext::empty(),
        }
    }

    /// Executor whose tasks complete instantly with a computed result.
    #[derive(Default)]
    struct InstantExecutor {
        spawned: AtomicUsize,
    }

    impl BatchExecutor for InstantExecutor {
        fn spawn(
            &self,
            _runtime: RuntimeId,
            target: &BlockHeader,
            batch: &SignedBatch,
        ) -> ExecutionHandle {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(ExecutionOutput::Computed(ComputedBatch {
                round: target.round,
                io_root: batch.io_root,
                state_root: Hash::from_bytes(b"post-state"),
                outputs: RawBatch::default(),
            }));
            ExecutionHandle::new(target.round, CancellationToken::new(), rx)
        }
    }

    /// Executor whose tasks run until cancelled, then report the abort.
    #[derive(Default)]
    struct HangingExecutor {
        delivered: Arc<AtomicBool>,
    }

    impl BatchExecutor for HangingExecutor {
        fn spawn(
            &self,
            _runtime: RuntimeId,
            target: &BlockHeader,
            _batch: &SignedBatch,
        ) -> ExecutionHandle {
            let (tx, rx) = oneshot::channel();
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            let round = target.round;
            let delivered = self.delivered.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                delivered.store(true, Ordering::SeqCst);
                let _ = tx.send(ExecutionOutput::Aborted {
                    round,
                    cause: AbortCause::Cancelled,
                });
            });
            ExecutionHandle::new(round, cancel, rx)
        }
    }

    async fn member(role: CommitteeRole, executor: Arc<dyn BatchExecutor>) -> CommitteeState {
        let mut st = CommitteeState::new(runtime_id(), executor, ExecutionPolicy::default());
        st.apply(CommitteeEvent::EpochTransition {
            epoch: EpochId(1),
            role: Some(role),
        })
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::WaitingForBatch);
        st
    }

    #[test]
    fn transition_table_is_exact() {
        use StateName::*;
        let expected = [
            (NotReady, vec![NotReady, WaitingForBatch]),
            (
                WaitingForBatch,
                vec![
                    WaitingForBatch,
                    WaitingForBlock,
                    ProcessingBatch,
                    WaitingForEvent,
                    NotReady,
                ],
            ),
            (
                WaitingForBlock,
                vec![WaitingForBatch, ProcessingBatch, WaitingForEvent, NotReady],
            ),
            (WaitingForEvent, vec![WaitingForBatch, ProcessingBatch, NotReady]),
            (ProcessingBatch, vec![WaitingForFinalize]),
            (WaitingForFinalize, vec![WaitingForBatch, NotReady]),
        ];
        let all = [
            NotReady,
            WaitingForBatch,
            WaitingForBlock,
            WaitingForEvent,
            ProcessingBatch,
            WaitingForFinalize,
        ];
        for (from, allowed) in expected {
            for to in all {
                assert_eq!(
                    transition_allowed(from, to),
                    allowed.contains(&to),
                    "transition {from} -> {to}"
                );
            }
        }
    }

    #[tokio::test]
    async fn repeated_epoch_entry_is_idempotent() {
        let mut st = member(CommitteeRole::Primary, Arc::new(InstantExecutor::default())).await;
        st.apply(CommitteeEvent::EpochTransition {
            epoch: EpochId(1),
            role: Some(CommitteeRole::Primary),
        })
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::WaitingForBatch);
    }

    #[tokio::test]
    async fn epoch_exit_from_not_ready_stays_not_ready() {
        let mut st = CommitteeState::new(
            runtime_id(),
            Arc::new(InstantExecutor::default()),
            ExecutionPolicy::default(),
        );
        st.apply(CommitteeEvent::EpochTransition {
            epoch: EpochId(1),
            role: None,
        })
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::NotReady);
    }

    #[tokio::test]
    async fn primary_executes_batch_with_current_block() {
        let exec = Arc::new(InstantExecutor::default());
        let mut st = member(CommitteeRole::Primary, exec.clone()).await;
        st.apply(CommitteeEvent::BlockSeen { header: header(5) })
            .await
            .unwrap();
        st.apply(CommitteeEvent::BatchReceived {
            batch: signed_batch(&[b"tx1", b"tx2"]),
            target: header(5),
        })
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::ProcessingBatch);
        assert_eq!(exec.spawned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_without_block_waits_then_executes() {
        let exec = Arc::new(InstantExecutor::default());
        let mut st = member(CommitteeRole::Primary, exec.clone()).await;
        st.apply(CommitteeEvent::BatchReceived {
            batch: signed_batch(&[b"tx"]),
            target: header(3),
        })
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::WaitingForBlock);
        assert_eq!(exec.spawned.load(Ordering::SeqCst), 0);

        st.apply(CommitteeEvent::BlockSeen { header: header(3) })
            .await
            .unwrap();
        assert_eq!(st.state_name(), StateName::ProcessingBatch);
        assert_eq!(exec.spawned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn newer_block_aborts_waiting_batch() {
        let mut st = member(CommitteeRole::Primary, Arc::new(InstantExecutor::default())).await;
        st.apply(CommitteeEvent::BatchReceived {
            batch: signed_batch(&[b"tx"]),
            target: header(10),
        })
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::WaitingForBlock);

        // Round 10 was skipped: the chain committed round 11 directly.
        st.apply(CommitteeEvent::BlockSeen { header: header(11) })
            .await
            .unwrap();
        assert_eq!(st.state_name(), StateName::WaitingForBatch);
    }

    #[tokio::test]
    async fn backup_waits_for_discrepancy_then_executes() {
        let exec = Arc::new(InstantExecutor::default());
        let mut st = member(CommitteeRole::Backup, exec.clone()).await;
        st.apply(CommitteeEvent::BlockSeen { header: header(4) })
            .await
            .unwrap();
        st.apply(CommitteeEvent::BatchReceived {
            batch: signed_batch(&[b"tx"]),
            target: header(4),
        })
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::WaitingForEvent);
        assert_eq!(exec.spawned.load(Ordering::SeqCst), 0);

        // An unconfirmed signal must not promote the backup.
        st.apply(CommitteeEvent::Discrepancy(DiscrepancyEvent {
            round: Round(4),
            confirmed: false,
        }))
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::WaitingForEvent);

        st.apply(CommitteeEvent::Discrepancy(DiscrepancyEvent {
            round: Round(4),
            confirmed: true,
        }))
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::ProcessingBatch);
        assert_eq!(exec.spawned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backup_policy_off_executes_immediately() {
        let exec = Arc::new(InstantExecutor::default());
        let mut st = CommitteeState::new(
            runtime_id(),
            exec.clone(),
            ExecutionPolicy {
                backup_waits_for_event: false,
            },
        );
        st.apply(CommitteeEvent::EpochTransition {
            epoch: EpochId(1),
            role: Some(CommitteeRole::Backup),
        })
        .await
        .unwrap();
        st.apply(CommitteeEvent::BlockSeen { header: header(2) })
            .await
            .unwrap();
        st.apply(CommitteeEvent::BatchReceived {
            batch: signed_batch(&[b"tx"]),
            target: header(2),
        })
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::ProcessingBatch);
    }

    #[tokio::test]
    async fn pending_discrepancy_consumed_by_matching_batch() {
        let exec = Arc::new(InstantExecutor::default());
        let mut st = member(CommitteeRole::Backup, exec.clone()).await;
        st.apply(CommitteeEvent::BlockSeen { header: header(5) })
            .await
            .unwrap();

        // Discrepancy lands before any batch: stashed, state unchanged.
        st.apply(CommitteeEvent::Discrepancy(DiscrepancyEvent {
            round: Round(5),
            confirmed: true,
        }))
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::WaitingForBatch);

        // The batch for round 5 consumes the stash: straight to execution,
        // not WaitingForEvent.
        st.apply(CommitteeEvent::BatchReceived {
            batch: signed_batch(&[b"tx1", b"tx2"]),
            target: header(5),
        })
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::ProcessingBatch);
        assert_eq!(exec.spawned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pending_discrepancy_survives_block_wait() {
        let exec = Arc::new(InstantExecutor::default());
        let mut st = member(CommitteeRole::Backup, exec.clone()).await;

        st.apply(CommitteeEvent::BatchReceived {
            batch: signed_batch(&[b"tx"]),
            target: header(6),
        })
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::WaitingForBlock);

        st.apply(CommitteeEvent::Discrepancy(DiscrepancyEvent {
            round: Round(6),
            confirmed: true,
        }))
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::WaitingForBlock);

        // Block arrival resolves the wait and the stash promotes immediately.
        st.apply(CommitteeEvent::BlockSeen { header: header(6) })
            .await
            .unwrap();
        assert_eq!(st.state_name(), StateName::ProcessingBatch);
    }

    #[tokio::test]
    async fn epoch_loss_drains_running_execution() {
        let exec = Arc::new(HangingExecutor::default());
        let delivered = exec.delivered.clone();
        let mut st = member(CommitteeRole::Primary, exec).await;
        st.apply(CommitteeEvent::BlockSeen { header: header(8) })
            .await
            .unwrap();
        st.apply(CommitteeEvent::BatchReceived {
            batch: signed_batch(&[b"tx"]),
            target: header(8),
        })
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::ProcessingBatch);
        assert!(!delivered.load(Ordering::SeqCst));

        // Blocks until the task observed cancellation and delivered its
        // abort; only then is NotReady reached.
        st.apply(CommitteeEvent::EpochTransition {
            epoch: EpochId(2),
            role: None,
        })
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::NotReady);
        assert!(delivered.load(Ordering::SeqCst));
        assert_eq!(st.role(), None);
    }

    #[tokio::test]
    async fn execution_complete_emits_finalize_and_round_finalizes() {
        let mut st = member(CommitteeRole::Primary, Arc::new(InstantExecutor::default())).await;
        st.apply(CommitteeEvent::BlockSeen { header: header(5) })
            .await
            .unwrap();
        st.apply(CommitteeEvent::BatchReceived {
            batch: signed_batch(&[b"tx1", b"tx2"]),
            target: header(5),
        })
        .await
        .unwrap();

        let output = st.completion().await;
        assert!(output.is_computed());
        let effects = st
            .apply(CommitteeEvent::ExecutionComplete { output })
            .await
            .unwrap();
        assert_eq!(st.state_name(), StateName::WaitingForFinalize);
        assert!(matches!(
            effects.as_slice(),
            [Effect::Finalize { round: Round(5), .. }]
        ));

        st.apply(CommitteeEvent::RoundFinalized { round: Round(5) })
            .await
            .unwrap();
        assert_eq!(st.state_name(), StateName::WaitingForBatch);
    }

    #[tokio::test]
    async fn illegal_events_leave_state_unchanged() {
        let mut st = CommitteeState::new(
            runtime_id(),
            Arc::new(InstantExecutor::default()),
            ExecutionPolicy::default(),
        );

        // Everything except an epoch transition (and ambient block tracking)
        // is illegal in NotReady.
        let err = st
            .apply(CommitteeEvent::BatchReceived {
                batch: signed_batch(&[b"tx"]),
                target: header(1),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::UnexpectedEvent { .. }));
        assert_eq!(st.state_name(), StateName::NotReady);

        let err = st
            .apply(CommitteeEvent::Discrepancy(DiscrepancyEvent {
                round: Round(1),
                confirmed: true,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::UnexpectedEvent { .. }));
        assert_eq!(st.state_name(), StateName::NotReady);

        let err = st
            .apply(CommitteeEvent::RoundFinalized { round: Round(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::UnexpectedEvent { .. }));
        assert_eq!(st.state_name(), StateName::NotReady);

        // ExecutionComplete without an in-flight execution is a bug upstream.
        let mut st = member(CommitteeRole::Primary, Arc::new(InstantExecutor::default())).await;
        let err = st
            .apply(CommitteeEvent::ExecutionComplete {
                output: ExecutionOutput::Aborted {
                    round: Round(1),
                    cause: AbortCause::Cancelled,
                },
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::UnexpectedEvent { .. }));
        assert_eq!(st.state_name(), StateName::WaitingForBatch);
    }

    /// Every (state, event) pair with no legal handling is rejected and the
    /// state is left untouched. Epoch transitions and block observations are
    /// legal everywhere and excluded.
    #[tokio::test]
    async fn illegal_event_matrix() {
        async fn in_state(name: StateName) -> CommitteeState {
            let mut st = CommitteeState::new(
                runtime_id(),
                Arc::new(HangingExecutor::default()),
                ExecutionPolicy::default(),
            );
            if name == StateName::NotReady {
                return st;
            }
            let role = if name == StateName::WaitingForEvent {
                CommitteeRole::Backup
            } else {
                CommitteeRole::Primary
            };
            st.apply(CommitteeEvent::EpochTransition {
                epoch: EpochId(1),
                role: Some(role),
            })
            .await
            .unwrap();
            match name {
                StateName::WaitingForBatch => {}
                StateName::WaitingForBlock => {
                    st.apply(CommitteeEvent::BatchReceived {
                        batch: signed_batch(&[b"tx"]),
                        target: header(2),
                    })
                    .await
                    .unwrap();
                }
                StateName::WaitingForEvent | StateName::ProcessingBatch => {
                    st.apply(CommitteeEvent::BlockSeen { header: header(1) })
                        .await
                        .unwrap();
                    st.apply(CommitteeEvent::BatchReceived {
                        batch: signed_batch(&[b"tx"]),
                        target: header(1),
                    })
                    .await
                    .unwrap();
                }
                StateName::WaitingForFinalize => {
                    st.apply(CommitteeEvent::BlockSeen { header: header(1) })
                        .await
                        .unwrap();
                    st.apply(CommitteeEvent::BatchReceived {
                        batch: signed_batch(&[b"tx"]),
                        target: header(1),
                    })
                    .await
                    .unwrap();
                    st.apply(CommitteeEvent::ExecutionComplete {
                        output: ExecutionOutput::Aborted {
                            round: Round(1),
                            cause: AbortCause::Cancelled,
                        },
                    })
                    .await
                    .unwrap();
                }
                _ => unreachable!(),
            }
            assert_eq!(st.state_name(), name, "fixture setup");
            st
        }

        fn batch_event() -> CommitteeEvent {
            CommitteeEvent::BatchReceived {
                batch: signed_batch(&[b"tx"]),
                target: header(1),
            }
        }
        fn discrepancy_event() -> CommitteeEvent {
            CommitteeEvent::Discrepancy(DiscrepancyEvent {
                round: Round(1),
                confirmed: true,
            })
        }
        fn complete_event() -> CommitteeEvent {
            CommitteeEvent::ExecutionComplete {
                output: ExecutionOutput::Aborted {
                    round: Round(1),
                    cause: AbortCause::Cancelled,
                },
            }
        }
        fn finalized_event() -> CommitteeEvent {
            CommitteeEvent::RoundFinalized { round: Round(1) }
        }

        type EventCtor = fn() -> CommitteeEvent;
        let illegal: [(StateName, Vec<EventCtor>); 6] = [
            (
                StateName::NotReady,
                vec![batch_event, discrepancy_event, complete_event, finalized_event],
            ),
            (
                StateName::WaitingForBatch,
                vec![complete_event, finalized_event],
            ),
            (
                StateName::WaitingForBlock,
                vec![batch_event, complete_event, finalized_event],
            ),
            (
                StateName::WaitingForEvent,
                vec![batch_event, complete_event, finalized_event],
            ),
            (
                StateName::ProcessingBatch,
                vec![batch_event, discrepancy_event, finalized_event],
            ),
            (
                StateName::WaitingForFinalize,
                vec![batch_event, discrepancy_event, complete_event],
            ),
        ];

        for (state, ctors) in illegal {
            for ctor in ctors {
                let mut st = in_state(state).await;
                let event = ctor();
                let name = event.type_name();
                let err = st.apply(event).await.unwrap_err();
                assert!(
                    matches!(err, StateError::UnexpectedEvent { .. }),
                    "{name} in {state}: {err}"
                );
                assert_eq!(st.state_name(), state, "{name} must not move {state}");
            }
        }
    }

    #[tokio::test]
    async fn stale_batch_is_rejected() {
        let mut st = member(CommitteeRole::Primary, Arc::new(InstantExecutor::default())).await;
        st.apply(CommitteeEvent::BlockSeen { header: header(6) })
            .await
            .unwrap();
        let err = st
            .apply(CommitteeEvent::BatchReceived {
                batch: signed_batch(&[b"tx"]),
                target: header(5),
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StateError::StaleEvent {
                round: Round(5),
                latest: Round(6)
            }
        );
        assert_eq!(st.state_name(), StateName::WaitingForBatch);
    }

    #[tokio::test]
    async fn duplicate_block_is_rejected() {
        let mut st = member(CommitteeRole::Primary, Arc::new(InstantExecutor::default())).await;
        st.apply(CommitteeEvent::BlockSeen { header: header(6) })
            .await
            .unwrap();
        let err = st
            .apply(CommitteeEvent::BlockSeen { header: header(6) })
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::StaleEvent { .. }));
    }

    #[tokio::test]
    async fn epoch_change_discards_stored_batch() {
        let mut st = member(CommitteeRole::Primary, Arc::new(InstantExecutor::default())).await;
        st.apply(CommitteeEvent::BatchReceived {
            batch: signed_batch(&[b"tx"]),
            target: header(9),
        })
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::WaitingForBlock);

        st.apply(CommitteeEvent::EpochTransition {
            epoch: EpochId(2),
            role: Some(CommitteeRole::Backup),
        })
        .await
        .unwrap();
        assert_eq!(st.state_name(), StateName::WaitingForBatch);
        assert_eq!(st.role(), Some(CommitteeRole::Backup));
    }
}
