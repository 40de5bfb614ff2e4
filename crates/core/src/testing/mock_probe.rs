//! Mock run status probe for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::run::{DetectedRun, ProbeError, Run, RunStatus, RunStatusProbe};

/// Mock implementation of the RunStatusProbe trait.
///
/// Runs added with [`MockRunProbe::add_run`] are reported by every `detect`
/// call until removed, and are active until [`MockRunProbe::end_run`].
#[derive(Debug)]
pub struct MockRunProbe {
    runs: Arc<RwLock<Vec<DetectedRun>>>,
    /// Runs reported as ended, with their last lumisection.
    ended: Arc<RwLock<HashMap<String, Option<u64>>>>,
    detect_calls: Arc<RwLock<usize>>,
    /// If set, the next `detect` or `status` call will fail with this error.
    next_error: Arc<RwLock<Option<ProbeError>>>,
}

impl Default for MockRunProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunProbe {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(Vec::new())),
            ended: Arc::new(RwLock::new(HashMap::new())),
            detect_calls: Arc::new(RwLock::new(0)),
            next_error: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn add_run(&self, run: DetectedRun) {
        self.runs.write().await.push(run);
    }

    pub async fn remove_run(&self, id: &str) {
        self.runs.write().await.retain(|r| r.id != id);
    }

    /// Report the run as no longer active.
    pub async fn end_run(&self, id: &str, last_unit_seen: Option<u64>) {
        self.ended.write().await.insert(id.to_string(), last_unit_seen);
    }

    pub async fn set_next_error(&self, error: ProbeError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn detect_count(&self) -> usize {
        *self.detect_calls.read().await
    }
}

#[async_trait]
impl RunStatusProbe for MockRunProbe {
    fn name(&self) -> &str {
        "mock"
    }

    async fn detect(&self) -> Result<Vec<DetectedRun>, ProbeError> {
        *self.detect_calls.write().await += 1;

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        Ok(self.runs.read().await.clone())
    }

    async fn status(&self, run: &Run) -> Result<RunStatus, ProbeError> {
        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        let ended = self.ended.read().await;
        Ok(RunStatus {
            run_id: run.id.clone(),
            last_unit_seen: ended.get(&run.id).copied().flatten(),
            still_active: !ended.contains_key(&run.id),
        })
    }
}
