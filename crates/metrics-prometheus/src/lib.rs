//! Prometheus metrics backend for Conclave.
//!
//! Implements [`conclave_metrics::MetricsRecorder`] using native Prometheus
//! counters, gauges, and histograms.
//!
//! # Usage
//!
//! Call [`install()`] once at startup before any metrics are recorded:
//! ```ignore
//! conclave_metrics_prometheus::install();
//! ```

use conclave_metrics::MetricsRecorder;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Gauge, Histogram,
};

/// Domain-specific Prometheus metrics for production monitoring.
pub struct Metrics {
    // === State machine ===
    pub state_transitions: CounterVec,
    pub invalid_transitions: CounterVec,
    pub stale_events: CounterVec,
    pub pending_events_consumed: Counter,

    // === Execution ===
    pub batch_execution_latency: Histogram,
    pub batches_computed: Counter,
    pub batches_aborted: Counter,
    pub batches_discarded: CounterVec,
    pub executions_cancelled: Counter,

    // === Finalization ===
    pub rounds_finalized: Counter,
    pub round_finalize_latency: Histogram,
    pub finalize_retries: Counter,
    pub finalize_fatal: Counter,

    // === Node ===
    pub active_runtimes: Gauge,
    pub event_queue_depth: Gauge,
}

impl Metrics {
    fn new() -> Self {
        let latency_buckets = vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ];

        Self {
            state_transitions: register_counter_vec!(
                "conclave_state_transitions_total",
                "Committee state transitions by from/to state name",
                &["from", "to"]
            )
            .unwrap(),

            invalid_transitions: register_counter_vec!(
                "conclave_invalid_transitions_total",
                "Events rejected as illegal for the current state",
                &["state", "event"]
            )
            .unwrap(),

            stale_events: register_counter_vec!(
                "conclave_stale_events_total",
                "Events discarded as stale",
                &["event"]
            )
            .unwrap(),

            pending_events_consumed: register_counter!(
                "conclave_pending_events_consumed_total",
                "Stashed discrepancy events consumed by a later batch"
            )
            .unwrap(),

            batch_execution_latency: register_histogram!(
                "conclave_batch_execution_latency_seconds",
                "Wall-clock time from execution spawn to completion",
                latency_buckets.clone()
            )
            .unwrap(),

            batches_computed: register_counter!(
                "conclave_batches_computed_total",
                "Batch executions that produced a computed result"
            )
            .unwrap(),

            batches_aborted: register_counter!(
                "conclave_batches_aborted_total",
                "Batch executions that stopped without a computed result"
            )
            .unwrap(),

            batches_discarded: register_counter_vec!(
                "conclave_batches_discarded_total",
                "Batches discarded before execution",
                &["reason"]
            )
            .unwrap(),

            executions_cancelled: register_counter!(
                "conclave_executions_cancelled_total",
                "Execution tasks cancelled by the driver"
            )
            .unwrap(),

            rounds_finalized: register_counter!(
                "conclave_rounds_finalized_total",
                "Rounds finalized on chain"
            )
            .unwrap(),

            round_finalize_latency: register_histogram!(
                "conclave_round_finalize_latency_seconds",
                "Time from batch start to round finalization",
                latency_buckets
            )
            .unwrap(),

            finalize_retries: register_counter!(
                "conclave_finalize_retries_total",
                "Finalize submissions retried after a transient failure"
            )
            .unwrap(),

            finalize_fatal: register_counter!(
                "conclave_finalize_fatal_total",
                "Finalize submissions that failed permanently"
            )
            .unwrap(),

            active_runtimes: register_gauge!(
                "conclave_active_runtimes",
                "Registered runtime committees"
            )
            .unwrap(),

            event_queue_depth: register_gauge!(
                "conclave_event_queue_depth",
                "Committee driver event queue depth"
            )
            .unwrap(),
        }
    }
}

struct PrometheusRecorder {
    metrics: Metrics,
}

impl PrometheusRecorder {
    fn new() -> Self {
        Self {
            metrics: Metrics::new(),
        }
    }
}

impl MetricsRecorder for PrometheusRecorder {
    fn record_state_transition(&self, from: &'static str, to: &'static str) {
        self.metrics
            .state_transitions
            .with_label_values(&[from, to])
            .inc();
    }

    fn record_invalid_transition(&self, state: &'static str, event: &'static str) {
        self.metrics
            .invalid_transitions
            .with_label_values(&[state, event])
            .inc();
    }

    fn record_stale_event(&self, event: &'static str) {
        self.metrics.stale_events.with_label_values(&[event]).inc();
    }

    fn record_pending_event_consumed(&self) {
        self.metrics.pending_events_consumed.inc();
    }

    fn record_batch_execution(&self, latency_secs: f64, computed: bool) {
        self.metrics.batch_execution_latency.observe(latency_secs);
        if computed {
            self.metrics.batches_computed.inc();
        } else {
            self.metrics.batches_aborted.inc();
        }
    }

    fn record_batch_discarded(&self, reason: &'static str) {
        self.metrics
            .batches_discarded
            .with_label_values(&[reason])
            .inc();
    }

    fn record_execution_cancelled(&self) {
        self.metrics.executions_cancelled.inc();
    }

    fn record_round_finalized(&self, latency_secs: f64) {
        self.metrics.rounds_finalized.inc();
        self.metrics.round_finalize_latency.observe(latency_secs);
    }

    fn record_finalize_retry(&self) {
        self.metrics.finalize_retries.inc();
    }

    fn record_finalize_fatal(&self) {
        self.metrics.finalize_fatal.inc();
    }

    fn set_active_runtimes(&self, count: usize) {
        self.metrics.active_runtimes.set(count as f64);
    }

    fn set_event_queue_depth(&self, depth: usize) {
        self.metrics.event_queue_depth.set(depth as f64);
    }
}

/// Install the Prometheus recorder as the global metrics backend.
///
/// Idempotent; only the first call has any effect.
pub fn install() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        conclave_metrics::set_global_recorder(Box::new(PrometheusRecorder::new()));
    });
}

/// Gather and encode all registered Prometheus metrics as text format.
///
/// Returns `(content_type, encoded_body)` suitable for an HTTP response.
pub fn encode_metrics() -> Result<(String, Vec<u8>), String> {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let content_type = encoder.format_type().to_string();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("{e}"))?;
    Ok((content_type, buffer))
}

#[cfg(test)]
mod tests {
    #[test]
    fn install_and_encode() {
        super::install();
        conclave_metrics::record_state_transition("WaitingForBatch", "ProcessingBatch");
        conclave_metrics::record_batch_execution(0.05, true);
        conclave_metrics::record_round_finalized(0.2);
        conclave_metrics::set_active_runtimes(2);

        let (content_type, body) = super::encode_metrics().unwrap();
        assert!(content_type.starts_with("text/plain"));
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("conclave_state_transitions_total"));
        assert!(text.contains("conclave_rounds_finalized_total"));
        assert!(text.contains("conclave_active_runtimes"));
    }
}
