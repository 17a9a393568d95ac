//! Committee node layer for Conclave.
//!
//! Wires the per-runtime state machine (`conclave-core`) to the outside
//! world:
//!
//! - [`CommitteeHandle`]: cloneable producer side of a runtime's serialized
//!   event queue — epoch ticker, block watcher, batch receiver, and
//!   discrepancy feed each hold one and push concurrently.
//! - [`CommitteeDriver`]: the single consumer; applies events in order and
//!   executes the machine's effects (finalize submission with retry policy).
//! - [`CommitteeRegistry`]: one driver task per registered runtime, with
//!   graceful shutdown that drains in-flight executions.

mod config;
mod driver;
mod registry;
mod router;

pub use config::{FinalizeConfig, NodeConfig};
pub use driver::CommitteeDriver;
pub use registry::CommitteeRegistry;
pub use router::{CommitteeHandle, RouterError};
