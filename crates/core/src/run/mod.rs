//! Run detection and upstream run status.
//!
//! A [`RunStatusProbe`] answers two questions: which runs exist right now,
//! and whether a given run is still producing fragments.

mod config;
mod directory;
mod oms;
mod probe;
mod types;

pub use config::{DirectoryProbeConfig, OmsProbeConfig, ProbeBackend, ProbeConfig};
pub use directory::DirectoryRunProbe;
pub use oms::{run_path, OmsRunProbe};
pub use probe::{ProbeError, RunStatusProbe};
pub use types::{DetectedRun, Run, RunStatus};

use crate::config::ConfigError;

/// Create the run probe selected by configuration.
pub fn create_probe(config: &ProbeConfig) -> Result<Box<dyn RunStatusProbe>, ConfigError> {
    match config.backend {
        ProbeBackend::Directory => {
            let directory = config.directory.clone().ok_or_else(|| {
                ConfigError::ValidationError("missing [probe.directory] section".to_string())
            })?;
            Ok(Box::new(DirectoryRunProbe::new(directory)))
        }
        ProbeBackend::Oms => {
            let oms = config.oms.clone().ok_or_else(|| {
                ConfigError::ValidationError("missing [probe.oms] section".to_string())
            })?;
            let probe =
                OmsRunProbe::new(oms).map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            Ok(Box::new(probe))
        }
    }
}
