//! Detached job launch.

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use super::types::JobSpec;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open job log: {0}")]
    Log(#[from] std::io::Error),
}

/// Starts rendered jobs out of band.
///
/// Implementations return once the process is started. The controller never
/// learns whether the job succeeds.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start `spec`. Returns the process id when one is known.
    async fn launch(&self, spec: &JobSpec) -> Result<Option<u32>, LaunchError>;
}

/// Runs the job script in its own session with output redirected to
/// `stdout.log` and `stderr.log` in the job directory.
pub struct DetachedLauncher {
    shell: String,
}

impl DetachedLauncher {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    async fn command(&self, spec: &JobSpec) -> Result<Command, LaunchError> {
        let stdout = tokio::fs::File::create(spec.job_dir.join("stdout.log"))
            .await?
            .into_std()
            .await;
        let stderr = tokio::fs::File::create(spec.job_dir.join("stderr.log"))
            .await?
            .into_std()
            .await;

        let mut cmd = Command::new(&self.shell);
        cmd.arg(&spec.script)
            .current_dir(&spec.job_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        #[cfg(unix)]
        detach(&mut cmd);

        Ok(cmd)
    }
}

/// Move the child into a new session so it outlives the controller and
/// does not receive its terminal signals.
#[cfg(unix)]
fn detach(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[async_trait]
impl ProcessLauncher for DetachedLauncher {
    async fn launch(&self, spec: &JobSpec) -> Result<Option<u32>, LaunchError> {
        let mut cmd = self.command(spec).await?;
        debug!(
            shell = %self.shell,
            script = %spec.script,
            dir = %spec.job_dir.display(),
            "Starting job"
        );

        // The child handle is dropped right away; tokio reaps the process
        // in the background once it exits.
        let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: self.shell.clone(),
            source,
        })?;
        let pid = child.id();

        info!(
            run = %spec.run_id,
            job = %spec.artifact_name(),
            pid = ?pid,
            "Launched job"
        );
        Ok(pid)
    }
}
