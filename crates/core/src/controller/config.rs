//! Controller configuration.

use serde::{Deserialize, Serialize};

use crate::bookkeeping::AccumulationPolicy;
use crate::dispatcher::JobFlavor;

/// Thresholds and timing of the batch controller.
///
/// Immutable for the lifetime of a controller instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Job flavor generated for each batch.
    #[serde(default)]
    pub flavor: JobFlavor,

    /// Minimum number of fragments that triggers a non-final batch.
    #[serde(default = "default_minimum_batch")]
    pub minimum_batch: usize,

    /// Delay between cycles while a run is active (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Delay between run detection attempts while idle (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub idle_poll_interval_ms: u64,

    /// Force-finalize a run this long after it started (0 = never).
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// How listings turn into batches.
    #[serde(default)]
    pub accumulation: AccumulationPolicy,
}

fn default_minimum_batch() -> usize {
    3
}

fn default_poll_interval() -> u64 {
    60_000 // 1 minute
}

fn default_run_timeout() -> u64 {
    8 * 60 * 60 // 8 hours
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            flavor: JobFlavor::default(),
            minimum_batch: default_minimum_batch(),
            poll_interval_ms: default_poll_interval(),
            idle_poll_interval_ms: default_poll_interval(),
            run_timeout_secs: default_run_timeout(),
            accumulation: AccumulationPolicy::default(),
        }
    }
}

impl ControllerConfig {
    /// Run timeout, `None` when disabled.
    pub fn run_timeout(&self) -> Option<chrono::Duration> {
        (self.run_timeout_secs > 0).then(|| chrono::Duration::seconds(self.run_timeout_secs as i64))
    }
}
