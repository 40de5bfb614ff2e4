//! Toolchain parameters forwarded verbatim into rendered jobs.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::ConfigError;

/// Software environment a job runs under.
///
/// Read from a small JSON document at every controller reset so that an
/// operator can roll the release or conditions between runs without
/// restarting the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainParams {
    #[serde(rename = "SCRAM_ARCH")]
    pub scram_arch: String,
    #[serde(rename = "CMSSW_VERSION")]
    pub software_version: String,
    #[serde(rename = "GLOBAL_TAG")]
    pub global_tag: String,
}

impl ToolchainParams {
    /// Load and validate the parameter file. Any failure here is fatal for
    /// the controller.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toolchain_error = |reason: String| ConfigError::Toolchain {
            path: path.display().to_string(),
            reason,
        };

        let raw = std::fs::read_to_string(path).map_err(|e| toolchain_error(e.to_string()))?;
        let params: ToolchainParams =
            serde_json::from_str(&raw).map_err(|e| toolchain_error(e.to_string()))?;

        for (name, value) in [
            ("SCRAM_ARCH", &params.scram_arch),
            ("CMSSW_VERSION", &params.software_version),
            ("GLOBAL_TAG", &params.global_tag),
        ] {
            if value.trim().is_empty() {
                return Err(toolchain_error(format!("{} is empty", name)));
            }
        }

        Ok(params)
    }
}
