//! Persisted per-run artifacts in the run working directory.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::finalized::StoreError;
use super::sets::FragmentSets;
use crate::fragment::Fragment;

/// File names of the persisted run artifacts.
///
/// Downstream tooling reads these; the formats are fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// RFC 3339 UTC timestamp of the run start, no trailing newline.
    #[serde(default = "default_start_marker")]
    pub start_marker: String,

    /// Dispatched fragment ids, one per line. Defaults depend on the job
    /// flavor (`allLSProcessed.log` / `allStep3FilesProcessed.log`).
    #[serde(default)]
    pub dispatched_log: Option<String>,

    /// Expected job outputs, one `file:<path>` per line.
    #[serde(default = "default_expected_outputs_log")]
    pub expected_outputs_log: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            start_marker: default_start_marker(),
            dispatched_log: None,
            expected_outputs_log: default_expected_outputs_log(),
        }
    }
}

fn default_start_marker() -> String {
    "runStart.log".to_string()
}

fn default_expected_outputs_log() -> String {
    "expectedOutputs.log".to_string()
}

/// Artifact paths of one run.
#[derive(Debug, Clone)]
pub struct RunLayout {
    dir: PathBuf,
    start_marker: PathBuf,
    dispatched_log: PathBuf,
    expected_outputs_log: PathBuf,
}

impl RunLayout {
    pub fn new(dir: &Path, config: &LayoutConfig, default_dispatched_log: &str) -> Self {
        let dispatched_log = config
            .dispatched_log
            .as_deref()
            .unwrap_or(default_dispatched_log);

        Self {
            dir: dir.to_path_buf(),
            start_marker: dir.join(&config.start_marker),
            dispatched_log: dir.join(dispatched_log),
            expected_outputs_log: dir.join(&config.expected_outputs_log),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dispatched_log(&self) -> &Path {
        &self.dispatched_log
    }

    pub fn expected_outputs_log(&self) -> &Path {
        &self.expected_outputs_log
    }

    /// Directory of the `number`-th job of the run, e.g. `expressJob003`.
    pub fn job_dir(&self, prefix: &str, number: u32) -> PathBuf {
        self.dir.join(format!("{}{:03}", prefix, number))
    }

    /// Start time recorded in the start marker.
    ///
    /// A missing or unreadable marker yields `None`.
    pub async fn read_start_marker(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let contents = match fs::read_to_string(&self.start_marker).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let line = contents.lines().next().unwrap_or("").trim();
        match DateTime::parse_from_rfc3339(line) {
            Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
            Err(e) => {
                warn!(
                    path = %self.start_marker.display(),
                    error = %e,
                    "Ignoring unparseable run start marker"
                );
                Ok(None)
            }
        }
    }

    /// Write the start marker unless one already exists.
    ///
    /// Returns `true` when the marker was created.
    pub async fn write_start_marker(&self, started_at: DateTime<Utc>) -> Result<bool, StoreError> {
        fs::create_dir_all(&self.dir).await?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.start_marker)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        file.write_all(format_timestamp(started_at).as_bytes()).await?;
        file.flush().await?;
        debug!(path = %self.start_marker.display(), "Wrote run start marker");
        Ok(true)
    }

    /// Write the dispatched-fragment and expected-output logs.
    pub async fn write_summary(&self, sets: &FragmentSets) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;
        fs::write(&self.dispatched_log, format_dispatched_log(sets.dispatched())).await?;
        fs::write(
            &self.expected_outputs_log,
            format_expected_outputs(sets.expected_outputs()),
        )
        .await?;
        Ok(())
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub fn format_dispatched_log(dispatched: &BTreeSet<Fragment>) -> String {
    dispatched.iter().map(|f| format!("{}\n", f.id)).collect()
}

pub fn format_expected_outputs(outputs: &BTreeSet<String>) -> String {
    outputs.iter().map(|o| format!("file:{}\n", o)).collect()
}
