//! Testing utilities and mock implementations for controller tests.
//!
//! This module provides mock implementations of the controller's external
//! seams, so a whole run can be driven without a run registry, storage or
//! a batch system.
//!
//! # Example
//!
//! ```rust,ignore
//! use runloop_core::testing::{fixtures, MockFragmentSource, MockLauncher, MockRunProbe};
//!
//! let probe = MockRunProbe::new();
//! let source = MockFragmentSource::new();
//! let launcher = MockLauncher::new();
//!
//! // Announce a run and make some fragments appear
//! probe.add_run(fixtures::detected_run("398348", base)).await;
//! source.add_fragments(&fixtures::location("398348"), fixtures::fragments("398348", [1, 2, 3])).await;
//!
//! // Wire them into a BatchController via Collaborators...
//! ```

mod mock_launcher;
mod mock_probe;
mod mock_source;

pub use mock_launcher::{MockLauncher, RecordedLaunch};
pub use mock_probe::MockRunProbe;
pub use mock_source::MockFragmentSource;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::{Path, PathBuf};

    use crate::fragment::Fragment;
    use crate::run::DetectedRun;

    /// Name of the toolchain parameter file written by
    /// [`write_toolchain_params`].
    pub const TOOLCHAIN_FILE: &str = "ngtParameters.jsn";

    /// Storage location fragments of `run_id` appear at.
    pub fn location(run_id: &str) -> String {
        format!("/store/t0streamer/Data/Express/000/{}", run_id)
    }

    /// A detected run whose working directory is `base/run<id>`.
    pub fn detected_run(run_id: &str, base: &Path) -> DetectedRun {
        DetectedRun {
            id: run_id.to_string(),
            location: location(run_id),
            working_dir: base.join(format!("run{}", run_id)),
            started_at: None,
        }
    }

    /// A streamer fragment for lumisection `key`.
    pub fn fragment(run_id: &str, key: u32) -> Fragment {
        Fragment::new(format!(
            "{}/run{}_ls{:04}_streamExpress_StorageManager.dat",
            location(run_id),
            run_id,
            key
        ))
        .with_ordering_key(key)
    }

    /// Fragments for each of `keys`.
    pub fn fragments(run_id: &str, keys: impl IntoIterator<Item = u32>) -> Vec<Fragment> {
        keys.into_iter().map(|k| fragment(run_id, k)).collect()
    }

    /// Write a valid toolchain parameter file into `dir` and return its path.
    pub fn write_toolchain_params(dir: &Path) -> PathBuf {
        let path = dir.join(TOOLCHAIN_FILE);
        let contents = serde_json::json!({
            "SCRAM_ARCH": "el8_amd64_gcc12",
            "CMSSW_VERSION": "CMSSW_14_0_9",
            "GLOBAL_TAG": "140X_dataRun3_Express_v3",
        });
        std::fs::write(&path, contents.to_string()).expect("write toolchain parameters");
        path
    }
}
