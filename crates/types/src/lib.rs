//! Core types for the Conclave compute-committee node.
//!
//! This crate provides the foundational types used throughout the committee
//! layer:
//!
//! - **Primitives**: `Hash`, opaque `Signature` carriers
//! - **Identifiers**: `RuntimeId`, `ValidatorId`, `Round`, `EpochId`
//! - **Committee types**: `CommitteeRole`, `DiscrepancyEvent`
//! - **Batch types**: `RawBatch`, `SignedBatch`, `ComputedBatch`
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod batch;
mod block;
mod committee;
mod execution;
mod hash;
mod identifiers;
mod signing;
mod trace;

pub use batch::{RawBatch, SignedBatch};
pub use block::BlockHeader;
pub use committee::{CommitteeRole, DiscrepancyEvent};
pub use execution::{AbortCause, ComputedBatch, ExecutionOutput};
pub use hash::{Hash, HexError};
pub use identifiers::{EpochId, Round, RuntimeId, ValidatorId};
pub use signing::Signature;
pub use trace::TraceContext;
