//! Node-level configuration for committee drivers.

use std::time::Duration;

use conclave_core::ExecutionPolicy;

/// Finalize submission policy.
///
/// Retries are executed inline by the driver; the backoff bounds below cap
/// how long the driver may stall between submissions, so keep them small.
#[derive(Debug, Clone, Copy)]
pub struct FinalizeConfig {
    /// Submission attempts before a `Retry` outcome degrades to fatal.
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles per attempt.
    pub backoff_base: Duration,
    /// Upper bound on a single backoff sleep.
    pub backoff_max: Duration,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(2),
        }
    }
}

/// Configuration for one runtime's committee driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeConfig {
    /// Role-based execution policy for the state machine.
    pub policy: ExecutionPolicy,
    /// Finalize submission policy.
    pub finalize: FinalizeConfig,
}
