//! Fragment source configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::types::OrderingKeyExtractor;

/// Configuration for the fragment source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Listing backend.
    pub backend: SourceBackend,

    /// Local directory listing (required when backend = "directory").
    #[serde(default)]
    pub directory: Option<DirectorySourceConfig>,

    /// Remote XRootD listing (required when backend = "xrootd").
    #[serde(default)]
    pub xrootd: Option<XrootdSourceConfig>,

    /// Regex with one capture group used to derive a fragment's ordering key
    /// from its file name.
    #[serde(default = "default_ordering_key_pattern")]
    pub ordering_key_pattern: String,

    /// Read lumisection keys from the files with `edmFileUtil` instead of
    /// relying on file names.
    #[serde(default)]
    pub lumi_keys: Option<LumiKeyConfig>,
}

/// Available listing backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceBackend {
    Directory,
    Xrootd,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySourceConfig {
    /// Descend into sub-directories.
    #[serde(default)]
    pub recursive: bool,

    /// Only list files whose name ends with this suffix.
    #[serde(default)]
    pub name_suffix: Option<String>,

    /// List completion markers instead of data files.
    #[serde(default)]
    pub marker: Option<MarkerMapping>,
}

/// A data file counts as available only once its sibling marker exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkerMapping {
    /// Marker file name, e.g. `ecalPedsStep3_job.txt`.
    pub control: String,
    /// Data file name the marker stands for, e.g. `PromptCalibProdEcalPedestals.root`.
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XrootdSourceConfig {
    /// Redirector URL, e.g. `root://eoscms.cern.ch`.
    pub endpoint: String,

    /// Path to the `xrdfs` client.
    #[serde(default = "default_xrdfs_path")]
    pub xrdfs_path: PathBuf,

    /// Timeout for a single listing in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LumiKeyConfig {
    /// Path to the `edmFileUtil` binary.
    #[serde(default = "default_edm_file_util_path")]
    pub edm_file_util_path: PathBuf,

    /// Prepended to each fragment id to form the file URL.
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,

    /// Timeout for a single file in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_edm_file_util_path() -> PathBuf {
    PathBuf::from("edmFileUtil")
}

fn default_url_prefix() -> String {
    "root://eoscms.cern.ch/".to_string()
}

fn default_ordering_key_pattern() -> String {
    OrderingKeyExtractor::DEFAULT_PATTERN.to_string()
}

fn default_xrdfs_path() -> PathBuf {
    PathBuf::from("xrdfs")
}

fn default_timeout() -> u64 {
    60
}
