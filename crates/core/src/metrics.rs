//! Prometheus metrics for the batch controller.
//!
//! This module provides metrics for:
//! - Run lifecycle (started, finalized)
//! - Batches and dispatched fragments
//! - Launch and transient collaborator failures
//! - The current automaton phase

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Run Metrics
// =============================================================================

/// Runs adopted by the controller.
pub static RUNS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("runloop_runs_started_total", "Total runs adopted").unwrap()
});

/// Runs driven to finalization.
pub static RUNS_FINALIZED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("runloop_runs_finalized_total", "Total runs finalized").unwrap()
});

// =============================================================================
// Dispatch Metrics
// =============================================================================

/// Batches rendered by kind.
pub static BATCHES_DISPATCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("runloop_batches_dispatched_total", "Total batches rendered"),
        &["kind"], // "regular", "final", "empty"
    )
    .unwrap()
});

/// Fragments moved into the dispatched set for the first time.
pub static FRAGMENTS_DISPATCHED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "runloop_fragments_dispatched_total",
        "Total fragments handed to jobs",
    )
    .unwrap()
});

/// Previously dispatched fragments included again under full relisting.
pub static FRAGMENTS_RESUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "runloop_fragments_resubmitted_total",
        "Total already-dispatched fragments submitted again",
    )
    .unwrap()
});

/// Fragments dropped at validation because their data was missing.
pub static FRAGMENTS_MISSING: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "runloop_fragments_missing_total",
        "Total fragments excluded from a batch because their data was missing",
    )
    .unwrap()
});

/// Jobs that could not be started.
pub static LAUNCH_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("runloop_launch_failures_total", "Total job start failures").unwrap()
});

// =============================================================================
// Controller Metrics
// =============================================================================

/// Aborted automaton steps by stage.
pub static TRANSIENT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "runloop_transient_failures_total",
            "Total automaton steps aborted by a collaborator failure",
        ),
        &["stage"], // "detect", "poll", "prepare", "render", "finalize", ...
    )
    .unwrap()
});

/// Current automaton phase (see `Phase::code`).
pub static CURRENT_PHASE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("runloop_controller_phase", "Current controller phase code").unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Runs
        Box::new(RUNS_STARTED.clone()),
        Box::new(RUNS_FINALIZED.clone()),
        // Dispatch
        Box::new(BATCHES_DISPATCHED.clone()),
        Box::new(FRAGMENTS_DISPATCHED.clone()),
        Box::new(FRAGMENTS_RESUBMITTED.clone()),
        Box::new(FRAGMENTS_MISSING.clone()),
        Box::new(LAUNCH_FAILURES.clone()),
        // Controller
        Box::new(TRANSIENT_FAILURES.clone()),
        Box::new(CURRENT_PHASE.clone()),
    ]
}
