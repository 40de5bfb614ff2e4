//! Fragment discovery at a watched location.
//!
//! A [`FragmentSource`] produces the full listing of a location on every
//! call. Two backends exist:
//! - [`DirectorySource`]: locally mounted directories, optionally listing
//!   completion markers instead of data files
//! - [`XrootdSource`]: remote storage listed through `xrdfs`
//!
//! Either can be wrapped in a [`LumiKeyedSource`] that reads ordering keys
//! out of the files instead of their names.

mod config;
mod directory;
mod lumi;
mod source;
mod types;
mod xrootd;

pub use config::{
    DirectorySourceConfig, LumiKeyConfig, MarkerMapping, SourceBackend, SourceConfig,
    XrootdSourceConfig,
};
pub use directory::DirectorySource;
pub use lumi::{parse_events_in_lumi, LumiKeyedSource};
pub use source::{FragmentSource, SourceError};
pub use types::{Fragment, OrderingKeyExtractor};
pub use xrootd::XrootdSource;

use crate::config::ConfigError;

/// Create the fragment source selected by configuration.
pub fn create_source(config: &SourceConfig) -> Result<Box<dyn FragmentSource>, ConfigError> {
    let keys = OrderingKeyExtractor::new(&config.ordering_key_pattern)
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    let source: Box<dyn FragmentSource> = match config.backend {
        SourceBackend::Directory => {
            let directory = config.directory.clone().ok_or_else(|| {
                ConfigError::ValidationError("missing [source.directory] section".to_string())
            })?;
            Box::new(DirectorySource::new(directory, keys))
        }
        SourceBackend::Xrootd => {
            let xrootd = config.xrootd.clone().ok_or_else(|| {
                ConfigError::ValidationError("missing [source.xrootd] section".to_string())
            })?;
            Box::new(XrootdSource::new(xrootd, keys))
        }
    };

    Ok(match config.lumi_keys.clone() {
        Some(lumi) => Box::new(LumiKeyedSource::new(source, lumi)),
        None => source,
    })
}
