//! Per-runtime committee driver loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use conclave_core::{
    BatchExecutor, CommitteeEvent, CommitteeState, Effect, FinalizeOutcome, RoundFinalizer,
    StateError,
};
use conclave_types::{ExecutionOutput, Round, RuntimeId};

use crate::config::NodeConfig;

/// What woke the driver.
enum Wake {
    /// The in-flight execution delivered its result.
    Completed(ExecutionOutput),
    /// An event arrived on the queue.
    Event(CommitteeEvent),
    /// Shutdown was requested.
    Shutdown,
    /// Every producer handle was dropped.
    Closed,
}

/// Single consumer of one runtime's event queue.
///
/// Owns the [`CommitteeState`] exclusively: events are applied one at a time,
/// in arrival order, and the returned effects are executed before the next
/// event is taken. The completion channel of an in-flight execution is
/// observed ahead of queued events so the machine reaches `WaitingForFinalize`
/// before anything else is applied.
pub struct CommitteeDriver {
    state: CommitteeState,
    events: mpsc::UnboundedReceiver<CommitteeEvent>,
    finalizer: Arc<dyn RoundFinalizer>,
    config: NodeConfig,
}

impl CommitteeDriver {
    /// Build a driver for `runtime` with a fresh `NotReady` state machine.
    pub fn new(
        runtime: RuntimeId,
        executor: Arc<dyn BatchExecutor>,
        finalizer: Arc<dyn RoundFinalizer>,
        events: mpsc::UnboundedReceiver<CommitteeEvent>,
        config: NodeConfig,
    ) -> Self {
        Self {
            state: CommitteeState::new(runtime, executor, config.policy),
            events,
            finalizer,
            config,
        }
    }

    /// Drive the state machine until shutdown or until all producers drop.
    ///
    /// An in-flight execution is cancelled and drained before the loop exits,
    /// so no executor task outlives its driver.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let runtime = self.state.runtime();
        info!(%runtime, "committee driver started");
        loop {
            let wake = tokio::select! {
                biased;
                // Completion first: the machine must pass through
                // WaitingForFinalize before any queued event is applied.
                output = self.state.completion() => Wake::Completed(output),
                _ = shutdown.cancelled() => Wake::Shutdown,
                event = self.events.recv() => match event {
                    Some(event) => Wake::Event(event),
                    None => Wake::Closed,
                },
            };

            match wake {
                Wake::Completed(output) => {
                    let effects = self
                        .apply(CommitteeEvent::ExecutionComplete { output })
                        .await;
                    self.execute_effects(effects).await;
                }
                Wake::Event(event) => {
                    conclave_metrics::set_event_queue_depth(self.events.len());
                    let effects = self.apply(event).await;
                    self.execute_effects(effects).await;
                }
                Wake::Shutdown => {
                    debug!(%runtime, "committee driver shutting down");
                    self.teardown().await;
                    break;
                }
                Wake::Closed => {
                    debug!(%runtime, "all producers gone, committee driver stopping");
                    self.teardown().await;
                    break;
                }
            }
        }
        info!(%runtime, "committee driver stopped");
    }

    /// Apply one event; rejected events are telemetry, never fatal.
    async fn apply(&mut self, event: CommitteeEvent) -> Vec<Effect> {
        let event_name = event.type_name();
        match self.state.apply(event).await {
            Ok(effects) => effects,
            Err(err @ StateError::StaleEvent { .. }) => {
                debug!(
                    runtime = %self.state.runtime(),
                    event = event_name,
                    error = %err,
                    "stale event discarded"
                );
                Vec::new()
            }
            Err(err) => {
                warn!(
                    runtime = %self.state.runtime(),
                    event = event_name,
                    state = %self.state.state_name(),
                    error = %err,
                    "event rejected"
                );
                Vec::new()
            }
        }
    }

    async fn execute_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Finalize { round, output } => self.submit_finalize(round, output).await,
            }
        }
    }

    /// Submit an execution result, retrying per the finalize policy.
    ///
    /// `Retry` outcomes back off exponentially up to the configured cap;
    /// exhausted retries and `Fatal` force the machine to `NotReady` through
    /// the epoch-update path — the node can no longer safely certify results.
    async fn submit_finalize(&mut self, round: Round, output: ExecutionOutput) {
        let runtime = self.state.runtime();
        let policy = self.config.finalize;
        let mut attempt: u32 = 0;
        loop {
            match self.finalizer.finalize(runtime, round, &output).await {
                FinalizeOutcome::Ok => {
                    debug!(%runtime, %round, "finalize submitted");
                    return;
                }
                FinalizeOutcome::Retry => {
                    attempt += 1;
                    conclave_metrics::record_finalize_retry();
                    if attempt >= policy.max_attempts {
                        warn!(%runtime, %round, attempt, "finalize retries exhausted");
                        break;
                    }
                    let backoff =
                        std::cmp::min(policy.backoff_base * 2u32.saturating_pow(attempt - 1), policy.backoff_max);
                    warn!(
                        %runtime,
                        %round,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "finalize submission failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                FinalizeOutcome::Fatal => break,
            }
        }

        conclave_metrics::record_finalize_fatal();
        error!(%runtime, %round, "finalize failed permanently, leaving committee");
        let epoch = self.state.epoch();
        let effects = self
            .apply(CommitteeEvent::EpochTransition { epoch, role: None })
            .await;
        debug_assert!(effects.is_empty());
    }

    /// Drain any in-flight execution and drop the state.
    ///
    /// Reuses the epoch-update path: it is the one transition sequence that
    /// is legal from every state and reclaims the execution handle.
    async fn teardown(&mut self) {
        let epoch = self.state.epoch();
        let _ = self
            .state
            .apply(CommitteeEvent::EpochTransition { epoch, role: None })
            .await;
    }
}
