//! Dispatcher data types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use crate::config::ToolchainParams;
use crate::fragment::Fragment;

/// The kind of job generated for each batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobFlavor {
    /// Per-segment reconstruction over a contiguous lumisection range.
    #[default]
    Express,
    /// Aggregation of completed per-segment outputs into conditions.
    Harvesting,
}

impl JobFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobFlavor::Express => "express",
            JobFlavor::Harvesting => "harvesting",
        }
    }

    /// Default name prefix of per-job directories.
    pub fn job_dir_prefix(&self) -> &'static str {
        match self {
            JobFlavor::Express => "expressJob",
            JobFlavor::Harvesting => "harvestJob",
        }
    }

    /// Name of the generated job script.
    pub fn script_name(&self) -> &'static str {
        match self {
            JobFlavor::Express => "cmsDriver.sh",
            JobFlavor::Harvesting => "HARVESTING.sh",
        }
    }

    /// Default name of the dispatched-fragment log.
    pub fn dispatched_log_name(&self) -> &'static str {
        match self {
            JobFlavor::Express => "allLSProcessed.log",
            JobFlavor::Harvesting => "allStep3FilesProcessed.log",
        }
    }

    /// Default prefix turning a fragment id into a job input.
    pub fn default_input_prefix(&self) -> &'static str {
        match self {
            JobFlavor::Express => "root://eoscms.cern.ch/",
            JobFlavor::Harvesting => "file:",
        }
    }
}

impl fmt::Display for JobFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering-key bounds of a batch, rendered as `LS0005To0012`.
///
/// Other pipeline stages parse this label out of file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLabel {
    pub min: u32,
    pub max: u32,
}

impl BatchLabel {
    /// Bounds over the keyed fragments of `batch`; `None` if no fragment
    /// carries a key.
    pub fn from_fragments(batch: &BTreeSet<Fragment>) -> Option<Self> {
        let mut bounds = batch.iter().filter_map(Fragment::key_bounds);
        let first = bounds.next()?;
        let (min, max) = bounds.fold(first, |(lo, hi), (a, b)| (lo.min(a), hi.max(b)));
        Some(Self { min, max })
    }
}

impl fmt::Display for BatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LS{:04}To{:04}", self.min, self.max)
    }
}

/// Everything a renderer needs to know about the run and the job slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: String,
    pub working_dir: PathBuf,
    pub toolchain: ToolchainParams,
    /// Index of this job within the run, starting at 0.
    pub job_number: u32,
    pub job_dir: PathBuf,
    /// Whether this is the run's final batch.
    pub terminal: bool,
}

/// A file produced by rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub name: String,
    pub contents: String,
    pub executable: bool,
}

impl RenderedFile {
    pub fn script(name: impl Into<String>, contents: String) -> Self {
        Self {
            name: name.into(),
            contents,
            executable: true,
        }
    }

    pub fn data(name: impl Into<String>, contents: String) -> Self {
        Self {
            name: name.into(),
            contents,
            executable: false,
        }
    }
}

/// A rendered, re-runnable job description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub run_id: String,
    pub flavor: JobFlavor,
    pub job_number: u32,
    pub job_dir: PathBuf,
    pub label: Option<BatchLabel>,
    /// Input fragments, ordered by id.
    pub inputs: Vec<Fragment>,
    pub terminal: bool,
    /// Script run by the launcher, relative to `job_dir`.
    pub script: String,
    pub files: Vec<RenderedFile>,
    /// Outputs the job will produce once it succeeds.
    pub expected_outputs: Vec<String>,
}

impl JobSpec {
    /// Deterministic artifact name, e.g. `run398348_LS0005To0012`.
    pub fn artifact_name(&self) -> String {
        match self.label {
            Some(label) => format!("run{}_{}", self.run_id, label),
            None => format!("run{}_{}{:03}", self.run_id, self.flavor.job_dir_prefix(), self.job_number),
        }
    }

    /// A job with no inputs is rendered but never started.
    pub fn is_launchable(&self) -> bool {
        !self.inputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_formatting() {
        let batch: BTreeSet<Fragment> = [5, 6, 9, 12]
            .into_iter()
            .map(|k| Fragment::new(format!("ls{:04}", k)).with_ordering_key(k))
            .collect();
        let label = BatchLabel::from_fragments(&batch).unwrap();
        assert_eq!(label, BatchLabel { min: 5, max: 12 });
        assert_eq!(label.to_string(), "LS0005To0012");
        assert_eq!(BatchLabel { min: 123, max: 12345 }.to_string(), "LS0123To12345");
    }

    #[test]
    fn test_label_ignores_unkeyed_fragments() {
        let mut batch: BTreeSet<Fragment> = BTreeSet::new();
        batch.insert(Fragment::new("notes.txt"));
        assert!(BatchLabel::from_fragments(&batch).is_none());

        batch.insert(Fragment::new("ls0007").with_ordering_key(7));
        assert_eq!(BatchLabel::from_fragments(&batch).unwrap().to_string(), "LS0007To0007");
    }

    #[test]
    fn test_label_spans_key_ranges() {
        let batch: BTreeSet<Fragment> = [
            Fragment::new("/store/a.dat").with_ordering_range(187, 190),
            Fragment::new("/store/b.dat").with_ordering_range(191, 194),
        ]
        .into_iter()
        .collect();
        assert_eq!(BatchLabel::from_fragments(&batch).unwrap().to_string(), "LS0187To0194");
    }

    #[test]
    fn test_flavor_defaults() {
        assert_eq!(JobFlavor::default(), JobFlavor::Express);
        assert_eq!(JobFlavor::Harvesting.job_dir_prefix(), "harvestJob");
        assert_eq!(JobFlavor::Harvesting.dispatched_log_name(), "allStep3FilesProcessed.log");
        assert_eq!(JobFlavor::Express.to_string(), "express");
    }
}
