//! Committee execution state machine for Conclave.
//!
//! This crate implements the core of the compute-committee protocol layer:
//! a per-runtime state machine that tracks the node's committee role through
//! an epoch and coordinates cancellable, at-most-one-concurrent batch
//! execution.
//!
//! # Architecture
//!
//! ```text
//! producers → event queue → driver loop → CommitteeState::apply() → Effects
//!                                │                 │
//!                                │                 └─▶ BatchExecutor::spawn (cancellable task)
//!                                └─◀ completion channel (single-fire)
//! ```
//!
//! The state machine is:
//! - **Serialized**: `apply` is only ever called by one driver task
//! - **Fail-closed**: illegal events leave the state untouched
//! - **Structurally race-free**: a new execution can only start from states
//!   that hold no prior execution handle
//!
//! All I/O lives behind the [`BatchExecutor`] and [`RoundFinalizer`] seams;
//! the driver (see `conclave-node`) executes returned [`Effect`]s.

mod error;
mod event;
mod state;
mod traits;

pub use error::StateError;
pub use event::CommitteeEvent;
pub use state::{
    transition_allowed, CommitteeState, ExecutionPolicy, NodeState, ProcessingState, StateName,
};
pub use traits::{BatchExecutor, Effect, ExecutionHandle, FinalizeOutcome, RoundFinalizer};
