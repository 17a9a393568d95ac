//! Committee membership types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Round;

/// Role a node holds within a runtime's compute committee for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitteeRole {
    /// Executes every scheduled batch immediately.
    Primary,
    /// Re-executes a batch only when the primary's result is contested.
    Backup,
}

impl fmt::Display for CommitteeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitteeRole::Primary => write!(f, "primary"),
            CommitteeRole::Backup => write!(f, "backup"),
        }
    }
}

/// Discrepancy-detection notification from the roothash feed.
///
/// `confirmed` is set once enough evidence exists that the primary's claimed
/// result is contested and backups must re-execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscrepancyEvent {
    /// Round the contested result belongs to.
    pub round: Round,
    /// Whether backup promotion is requested.
    pub confirmed: bool,
}
