//! Metrics facade for Conclave.
//!
//! Provides a [`MetricsRecorder`] trait with domain-specific methods and
//! default no-op implementations. A global singleton recorder is accessed via
//! [`recorder()`], and convenience free functions delegate to it.
//!
//! # Usage
//!
//! Callers record metrics via free functions:
//! ```ignore
//! conclave_metrics::record_state_transition("WaitingForBatch", "ProcessingBatch");
//! conclave_metrics::record_batch_execution(latency_secs, true);
//! ```
//!
//! At startup, install a backend:
//! ```ignore
//! conclave_metrics_prometheus::install();
//! ```
//! Without an installed backend every call is a no-op.

use std::sync::OnceLock;

// ═══════════════════════════════════════════════════════════════════════
// Trait
// ═══════════════════════════════════════════════════════════════════════

/// Domain-specific metrics recording trait.
///
/// All methods have default no-op implementations so backends only need
/// to override the metrics they care about.
#[allow(unused_variables)]
pub trait MetricsRecorder: Send + Sync + 'static {
    // ── State machine ────────────────────────────────────────────────

    /// Record a committee state transition with from/to state names.
    fn record_state_transition(&self, from: &'static str, to: &'static str) {}

    /// Record an event rejected as illegal for the current state.
    fn record_invalid_transition(&self, state: &'static str, event: &'static str) {}

    /// Record an event discarded as stale.
    fn record_stale_event(&self, event: &'static str) {}

    /// Record a stashed discrepancy event consumed by a later batch.
    fn record_pending_event_consumed(&self) {}

    // ── Execution ────────────────────────────────────────────────────

    /// Record a batch execution finishing, with wall-clock latency and
    /// whether it produced a computed result.
    fn record_batch_execution(&self, latency_secs: f64, computed: bool) {}

    /// Record a batch discarded before execution (stale round, epoch change).
    fn record_batch_discarded(&self, reason: &'static str) {}

    /// Record an execution task cancelled by the driver.
    fn record_execution_cancelled(&self) {}

    // ── Finalization ─────────────────────────────────────────────────

    /// Record a round finalized, with latency from batch start.
    fn record_round_finalized(&self, latency_secs: f64) {}

    /// Record a finalize submission retry.
    fn record_finalize_retry(&self) {}

    /// Record a fatal finalize outcome.
    fn record_finalize_fatal(&self) {}

    // ── Node ─────────────────────────────────────────────────────────

    /// Set the number of registered runtime committees.
    fn set_active_runtimes(&self, count: usize) {}

    /// Set the event queue depth for a runtime driver.
    fn set_event_queue_depth(&self, depth: usize) {}
}

// ═══════════════════════════════════════════════════════════════════════
// Global singleton
// ═══════════════════════════════════════════════════════════════════════

struct NoopRecorder;
impl MetricsRecorder for NoopRecorder {}

static RECORDER: OnceLock<Box<dyn MetricsRecorder>> = OnceLock::new();

/// Install a global metrics recorder.
///
/// Can only be called once. Subsequent calls are silently ignored.
pub fn set_global_recorder(recorder: Box<dyn MetricsRecorder>) {
    let _ = RECORDER.set(recorder);
}

/// Get the global metrics recorder.
///
/// Returns a no-op recorder if none has been installed.
#[inline]
fn recorder() -> &'static dyn MetricsRecorder {
    RECORDER.get().map(|r| r.as_ref()).unwrap_or(&NoopRecorder)
}

// ═══════════════════════════════════════════════════════════════════════
// Convenience free functions
// ═══════════════════════════════════════════════════════════════════════

/// Record a committee state transition.
#[inline]
pub fn record_state_transition(from: &'static str, to: &'static str) {
    recorder().record_state_transition(from, to);
}

/// Record an event rejected as illegal for the current state.
#[inline]
pub fn record_invalid_transition(state: &'static str, event: &'static str) {
    recorder().record_invalid_transition(state, event);
}

/// Record an event discarded as stale.
#[inline]
pub fn record_stale_event(event: &'static str) {
    recorder().record_stale_event(event);
}

/// Record a stashed discrepancy event consumed by a later batch.
#[inline]
pub fn record_pending_event_consumed() {
    recorder().record_pending_event_consumed();
}

/// Record a batch execution finishing.
#[inline]
pub fn record_batch_execution(latency_secs: f64, computed: bool) {
    recorder().record_batch_execution(latency_secs, computed);
}

/// Record a batch discarded before execution.
#[inline]
pub fn record_batch_discarded(reason: &'static str) {
    recorder().record_batch_discarded(reason);
}

/// Record an execution task cancelled by the driver.
#[inline]
pub fn record_execution_cancelled() {
    recorder().record_execution_cancelled();
}

/// Record a round finalized.
#[inline]
pub fn record_round_finalized(latency_secs: f64) {
    recorder().record_round_finalized(latency_secs);
}

/// Record a finalize submission retry.
#[inline]
pub fn record_finalize_retry() {
    recorder().record_finalize_retry();
}

/// Record a fatal finalize outcome.
#[inline]
pub fn record_finalize_fatal() {
    recorder().record_finalize_fatal();
}

/// Set the number of registered runtime committees.
#[inline]
pub fn set_active_runtimes(count: usize) {
    recorder().set_active_runtimes(count);
}

/// Set the event queue depth for a runtime driver.
#[inline]
pub fn set_event_queue_depth(depth: usize) {
    recorder().set_event_queue_depth(depth);
}
