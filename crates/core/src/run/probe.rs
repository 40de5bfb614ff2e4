//! Run status probe trait and errors.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{DetectedRun, Run, RunStatus};

/// Errors raised while querying run state.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Registry request failed.
    #[error("run registry request failed: {0}")]
    Request(String),

    /// Registry request timed out.
    #[error("run registry request timed out")]
    Timeout,

    /// Registry answered with something we could not interpret.
    #[error("unexpected run registry response: {0}")]
    InvalidResponse(String),

    /// The run is unknown upstream.
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Detects runs and reports whether a run is still producing fragments.
#[async_trait]
pub trait RunStatusProbe: Send + Sync {
    /// Returns the name of this probe implementation.
    fn name(&self) -> &str;

    /// Runs currently visible upstream, in no particular order.
    ///
    /// The controller filters out finalized runs and adopts the earliest of
    /// the remainder.
    async fn detect(&self) -> Result<Vec<DetectedRun>, ProbeError>;

    /// Current upstream status of `run`.
    async fn status(&self, run: &Run) -> Result<RunStatus, ProbeError>;
}
