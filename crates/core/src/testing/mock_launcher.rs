//! Mock process launcher for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::dispatcher::{JobSpec, LaunchError, ProcessLauncher};

/// A recorded launch for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedLaunch {
    /// The job that was submitted.
    pub spec: JobSpec,
    /// Whether the launch succeeded.
    pub success: bool,
}

/// Mock implementation of the ProcessLauncher trait.
///
/// Records every job instead of starting a process. Failed launches are
/// recorded too, with `success: false`.
#[derive(Debug)]
pub struct MockLauncher {
    launches: Arc<RwLock<Vec<RecordedLaunch>>>,
    /// If set, the next launch will fail with this error.
    next_error: Arc<RwLock<Option<LaunchError>>>,
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLauncher {
    pub fn new() -> Self {
        Self {
            launches: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Set an error to be returned by the next launch.
    pub async fn set_next_error(&self, error: LaunchError) {
        *self.next_error.write().await = Some(error);
    }

    /// Get all recorded launches.
    pub async fn recorded_launches(&self) -> Vec<RecordedLaunch> {
        self.launches.read().await.clone()
    }

    /// Jobs that were started successfully.
    pub async fn launched_jobs(&self) -> Vec<JobSpec> {
        self.launches
            .read()
            .await
            .iter()
            .filter(|l| l.success)
            .map(|l| l.spec.clone())
            .collect()
    }

    /// Number of launch attempts.
    pub async fn launch_count(&self) -> usize {
        self.launches.read().await.len()
    }

    /// Clear recorded launches.
    pub async fn clear(&self) {
        self.launches.write().await.clear();
    }
}

#[async_trait]
impl ProcessLauncher for MockLauncher {
    async fn launch(&self, spec: &JobSpec) -> Result<Option<u32>, LaunchError> {
        let error = self.next_error.write().await.take();
        self.launches.write().await.push(RecordedLaunch {
            spec: spec.clone(),
            success: error.is_none(),
        });

        match error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}
