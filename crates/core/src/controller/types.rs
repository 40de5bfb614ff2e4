//! Types for the batch controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::machine::Phase;
use crate::bookkeeping::StoreError;
use crate::config::ConfigError;
use crate::dispatcher::RenderError;
use crate::fragment::SourceError;
use crate::run::ProbeError;

/// Errors that can occur while driving the automaton.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Configuration or toolchain parameters could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Fragment listing or validation failed.
    #[error("fragment source error: {0}")]
    Source(#[from] SourceError),

    /// Run detection or status failed.
    #[error("run probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Persisting run state failed.
    #[error("bookkeeping error: {0}")]
    Store(#[from] StoreError),

    /// Rendering or writing a job failed.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// An effect ran without the state it needs.
    #[error("controller invariant violated: {0}")]
    Invariant(String),
}

impl ControllerError {
    /// Fatal errors stop the controller. Everything else aborts the current
    /// step and is retried on the next cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ControllerError::Config(_) | ControllerError::Invariant(_))
    }
}

/// Snapshot of the controller published after every committed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub observed: usize,
    pub to_process: usize,
    pub dispatched: usize,
    pub expected_outputs: usize,
    pub jobs_rendered: u32,
    /// Runs finalized since the process started.
    pub runs_finalized: u64,
    /// Last transient failure, cleared by the next successful step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ControllerStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            run_id: None,
            observed: 0,
            to_process: 0,
            dispatched: 0,
            expected_outputs: 0,
            jobs_rendered: 0,
            runs_finalized: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let err = ControllerError::Config(ConfigError::Toolchain {
            path: "/tmp/ngt/ngtParameters.jsn".to_string(),
            reason: "missing".to_string(),
        });
        assert!(err.is_fatal());

        let err = ControllerError::Probe(ProbeError::Timeout);
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "run probe error: run registry request timed out");

        assert!(ControllerError::Invariant("no run".to_string()).is_fatal());
    }

    #[test]
    fn test_status_serialization() {
        let status = ControllerStatus {
            phase: Phase::WaitingForFragments,
            run_id: Some("398348".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["phase"], "waiting_for_fragments");
        assert_eq!(json["run_id"], "398348");
        assert!(json.get("last_error").is_none());
    }
}
