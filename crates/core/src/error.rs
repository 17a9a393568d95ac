//! Error types for the committee state machine.

use thiserror::Error;

use crate::state::StateName;
use conclave_types::Round;

/// Errors returned by [`CommitteeState::apply`](crate::CommitteeState::apply).
///
/// All of these are non-fatal: the state machine is left unchanged and the
/// driver keeps draining events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The requested transition does not appear in the transition table.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// State the machine was in.
        from: StateName,
        /// State the event would have moved it to.
        to: StateName,
    },

    /// The event has no legal handling in the current state.
    #[error("event {event} is not legal in state {state}")]
    UnexpectedEvent {
        /// Current state name.
        state: StateName,
        /// Event type name.
        event: &'static str,
    },

    /// The event refers to an already-superseded or finalized round.
    #[error("stale event for round {round}, latest observed round is {latest}")]
    StaleEvent {
        /// Round the event referred to.
        round: Round,
        /// Latest round relevant to the current state.
        latest: Round,
    },
}
