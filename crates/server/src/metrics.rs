//! Prometheus metrics for observability.
//!
//! This module owns the registry served on `/metrics`:
//! - HTTP request metrics for the operational endpoints
//! - Active run gauges (collected from the controller status on scrape)
//! - Controller counters from `runloop_core::metrics`

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::state::AppState;

/// Routes with their own metric label; anything else is counted as `other`.
const KNOWN_PATHS: [&str; 4] = [
    "/api/v1/health",
    "/api/v1/config",
    "/api/v1/runs/finalized",
    "/metrics",
];

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "runloop_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("runloop_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

// =============================================================================
// Active Run Metrics
// =============================================================================

/// Fragments observed for the active run.
pub static RUN_FRAGMENTS_OBSERVED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "runloop_run_fragments_observed",
        "Fragments observed for the active run",
    )
    .unwrap()
});

/// Fragments waiting for dispatch in the active run.
pub static RUN_FRAGMENTS_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "runloop_run_fragments_pending",
        "Fragments waiting for dispatch in the active run",
    )
    .unwrap()
});

/// Jobs rendered for the active run.
pub static RUN_JOBS_RENDERED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("runloop_run_jobs_rendered", "Jobs rendered for the active run").unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();

    // Active run
    registry
        .register(Box::new(RUN_FRAGMENTS_OBSERVED.clone()))
        .unwrap();
    registry
        .register(Box::new(RUN_FRAGMENTS_PENDING.clone()))
        .unwrap();
    registry
        .register(Box::new(RUN_JOBS_RENDERED.clone()))
        .unwrap();

    // Controller metrics
    for metric in runloop_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Refresh the active run gauges from the latest controller status.
pub fn collect_dynamic_metrics(state: &AppState) {
    let status = state.controller_status();
    RUN_FRAGMENTS_OBSERVED.set(status.observed as i64);
    RUN_FRAGMENTS_PENDING.set(status.to_process as i64);
    RUN_JOBS_RENDERED.set(status.jobs_rendered as i64);
}

/// Metric label for a request path.
pub fn normalize_path(path: &str) -> &'static str {
    KNOWN_PATHS
        .iter()
        .find(|known| **known == path)
        .copied()
        .unwrap_or("other")
}
