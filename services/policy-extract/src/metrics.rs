//! Prometheus metrics exposition
//!
//! Service-level metrics recorded around each extraction request:
//!
//! - `extraction_requests_total` (counter): labels `insurer`, `outcome`
//! - `extraction_duration_seconds` (histogram): label `outcome`
//!
//! The orchestrator and key pool record their own counters through the same
//! `metrics` facade, so everything renders on one `/metrics` endpoint.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Histogram buckets for a whole extraction: the backend call dominates, and
/// retry delays plus key rotation can push a request past a minute.
const DURATION_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("extraction_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a finished extraction request.
///
/// `outcome` is `"success"` or the error kind.
pub fn record_extraction(insurer: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "extraction_requests_total",
        "insurer" => insurer.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    metrics::histogram!("extraction_duration_seconds", "outcome" => outcome.to_string())
        .record(duration_secs);
}
