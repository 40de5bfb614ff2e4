//! Run probe over run directories on a shared filesystem.

use async_trait::async_trait;
use std::path::Path;
use tokio::fs;

use super::config::DirectoryProbeConfig;
use super::probe::{ProbeError, RunStatusProbe};
use super::types::{DetectedRun, Run, RunStatus};

/// Detects runs as `<base>/<prefix><id>` directories.
///
/// A run is over once its end marker exists. Upstream producers write both
/// the start and end markers; the probe only reads them.
pub struct DirectoryRunProbe {
    config: DirectoryProbeConfig,
}

impl DirectoryRunProbe {
    pub fn new(config: DirectoryProbeConfig) -> Self {
        Self { config }
    }

    fn run_id<'a>(&self, dir_name: &'a str) -> Option<&'a str> {
        dir_name
            .strip_prefix(self.config.run_prefix.as_str())
            .filter(|id| !id.is_empty())
    }
}

#[async_trait]
impl RunStatusProbe for DirectoryRunProbe {
    fn name(&self) -> &str {
        "directory"
    }

    async fn detect(&self) -> Result<Vec<DetectedRun>, ProbeError> {
        let mut runs = Vec::new();
        let mut entries = fs::read_dir(&self.config.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| self.run_id(n)) else {
                continue;
            };
            let path = entry.path();
            runs.push(DetectedRun {
                id: id.to_string(),
                location: path.to_string_lossy().to_string(),
                working_dir: path,
                started_at: None,
            });
        }

        runs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(runs)
    }

    async fn status(&self, run: &Run) -> Result<RunStatus, ProbeError> {
        let end_marker = Path::new(&run.working_dir).join(&self.config.end_marker);
        let ended = fs::try_exists(&end_marker).await?;

        Ok(RunStatus {
            run_id: run.id.clone(),
            last_unit_seen: None,
            still_active: !ended,
        })
    }
}
