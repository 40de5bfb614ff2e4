//! Run probe configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for run detection and status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Probe backend.
    pub backend: ProbeBackend,

    /// Run directories on a shared filesystem (required when backend = "directory").
    #[serde(default)]
    pub directory: Option<DirectoryProbeConfig>,

    /// Run registry REST API (required when backend = "oms").
    #[serde(default)]
    pub oms: Option<OmsProbeConfig>,
}

/// Available probe backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeBackend {
    Directory,
    Oms,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryProbeConfig {
    /// Directory new run directories appear in.
    pub base_path: PathBuf,

    /// Name prefix of run directories; the remainder is the run id.
    #[serde(default = "default_run_prefix")]
    pub run_prefix: String,

    /// Marker file whose presence means the run has ended.
    #[serde(default = "default_end_marker")]
    pub end_marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmsProbeConfig {
    /// API base URL, e.g. `https://cmsoms.cms/agg/api`.
    pub url: String,

    /// API version path segment.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Watched location; `{run_path}` is replaced by the run number split as
    /// `XXX/YYY` (six-digit runs) and `{run}` by the plain run number.
    pub location_template: String,

    /// Directory run working directories are created under.
    pub work_root: PathBuf,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,

    /// Skip TLS certificate verification (in-network registries with
    /// self-signed certificates).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_run_prefix() -> String {
    "run".to_string()
}

fn default_end_marker() -> String {
    "runEnd.log".to_string()
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_timeout() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_directory_defaults() {
        let toml = r#"
            backend = "directory"

            [directory]
            base_path = "/tmp/ngt"
        "#;
        let config: ProbeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.backend, ProbeBackend::Directory);
        let directory = config.directory.unwrap();
        assert_eq!(directory.run_prefix, "run");
        assert_eq!(directory.end_marker, "runEnd.log");
    }

    #[test]
    fn test_deserialize_oms() {
        let toml = r#"
            backend = "oms"

            [oms]
            url = "https://cmsoms.cms/agg/api"
            location_template = "/eos/cms/tier0/store/data/Run2025G/TestEnablesEcalHcal/RAW/Express-v1/000/{run_path}/00000"
            work_root = "/tmp/ngt_mm"
            accept_invalid_certs = true
        "#;
        let config: ProbeConfig = toml::from_str(toml).unwrap();
        let oms = config.oms.unwrap();
        assert_eq!(oms.api_version, "v1");
        assert_eq!(oms.timeout_secs, 30);
        assert!(oms.accept_invalid_certs);
    }
}
