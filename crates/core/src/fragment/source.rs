//! Fragment source trait and errors.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

use super::types::Fragment;

/// Errors raised while listing a watched location.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The listing tool is not installed or not on PATH.
    #[error("listing tool not found at path: {path}")]
    ToolNotFound { path: PathBuf },

    /// The listing itself failed.
    #[error("failed to list {location}: {reason}")]
    ListingFailed { location: String, reason: String },

    /// The listing did not return in time.
    #[error("listing {location} timed out after {timeout_secs} seconds")]
    Timeout { location: String, timeout_secs: u64 },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    pub fn listing_failed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ListingFailed {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

/// Enumerates fragments currently present at a location.
///
/// Implementations return the full listing on every call. By upstream
/// contract a fragment never disappears once listed, but the controller does
/// not rely on it.
#[async_trait]
pub trait FragmentSource: Send + Sync {
    /// Returns the name of this source implementation.
    fn name(&self) -> &str;

    /// Lists every fragment currently present at `location`.
    async fn list(&self, location: &str) -> Result<BTreeSet<Fragment>, SourceError>;

    /// Whether the data backing `fragment` is still present.
    ///
    /// Sources that cannot check cheaply report `true`.
    async fn exists(&self, _fragment: &Fragment) -> Result<bool, SourceError> {
        Ok(true)
    }
}
