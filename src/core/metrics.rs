//! Prometheus metrics for the unification core.
//!
//! A single registry-wide instance tracks parse volume, outcomes, detection
//! methods, and stream throughput. Metrics are registered once on first use.

use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};
use std::sync::OnceLock;

/// Container for all core metrics.
pub struct Metrics {
    /// Total parse calls by provider and outcome (`ok`, `error`, or a
    /// failure kind).
    pub parse_total: IntCounterVec,

    /// Parse duration histogram in seconds, by provider.
    pub parse_duration: HistogramVec,

    /// Detection results by method and provider.
    pub detection_total: IntCounterVec,

    /// Stream chunks processed, by provider.
    pub stream_chunks_total: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// Subsequent calls return the same instance.
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let parse_total = register_int_counter_vec!(
            "llm_unify_parse_total",
            "Total parse calls",
            &["provider", "outcome"]
        )
        .expect("Failed to register parse_total metric");

        let parse_duration = register_histogram_vec!(
            "llm_unify_parse_duration_seconds",
            "Parse duration in seconds",
            &["provider"],
            vec![0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]
        )
        .expect("Failed to register parse_duration metric");

        let detection_total = register_int_counter_vec!(
            "llm_unify_detection_total",
            "Provider detections by method",
            &["method", "provider"]
        )
        .expect("Failed to register detection_total metric");

        let stream_chunks_total = register_int_counter_vec!(
            "llm_unify_stream_chunks_total",
            "Stream chunks processed",
            &["provider"]
        )
        .expect("Failed to register stream_chunks_total metric");

        Metrics {
            parse_total,
            parse_duration,
            detection_total,
            stream_chunks_total,
        }
    })
}

/// Get the metrics instance, initializing on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        let a = init_metrics() as *const Metrics;
        let b = init_metrics() as *const Metrics;
        assert_eq!(a, b);
    }

    #[test]
    fn test_counters_record() {
        let metrics = get_metrics();
        metrics
            .parse_total
            .with_label_values(&["openai", "ok"])
            .inc();
        metrics
            .detection_total
            .with_label_values(&["header", "anthropic"])
            .inc();
    }
}
