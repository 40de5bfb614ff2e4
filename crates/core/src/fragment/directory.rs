//! Local directory fragment source.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::config::DirectorySourceConfig;
use super::source::{FragmentSource, SourceError};
use super::types::{Fragment, OrderingKeyExtractor};

/// Lists fragments on a locally mounted filesystem.
pub struct DirectorySource {
    config: DirectorySourceConfig,
    keys: OrderingKeyExtractor,
}

impl DirectorySource {
    pub fn new(config: DirectorySourceConfig, keys: OrderingKeyExtractor) -> Self {
        Self { config, keys }
    }

    /// Collects regular files under `root`, descending only when configured.
    async fn collect_files(&self, root: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if self.config.recursive {
                        pending.push(entry.path());
                    }
                } else if file_type.is_file() {
                    files.push(entry.path());
                }
            }
        }

        Ok(files)
    }

    /// Maps a listed file to the fragment it represents, if any.
    fn to_fragment_path(&self, path: &Path) -> Option<PathBuf> {
        let name = path.file_name()?.to_str()?;

        if let Some(ref marker) = self.config.marker {
            return (name == marker.control).then(|| path.with_file_name(&marker.target));
        }

        match self.config.name_suffix {
            Some(ref suffix) if !name.ends_with(suffix.as_str()) => None,
            _ => Some(path.to_path_buf()),
        }
    }
}

#[async_trait]
impl FragmentSource for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn list(&self, location: &str) -> Result<BTreeSet<Fragment>, SourceError> {
        let root = Path::new(location);
        if !fs::try_exists(root).await? {
            debug!(location, "Watched directory does not exist yet");
            return Ok(BTreeSet::new());
        }

        let files = self
            .collect_files(root)
            .await
            .map_err(|e| SourceError::listing_failed(location, e.to_string()))?;

        Ok(files
            .iter()
            .filter_map(|p| self.to_fragment_path(p))
            .map(|p| self.keys.fragment(p.to_string_lossy().to_string()))
            .collect())
    }

    async fn exists(&self, fragment: &Fragment) -> Result<bool, SourceError> {
        Ok(fs::try_exists(&fragment.id).await?)
    }
}
