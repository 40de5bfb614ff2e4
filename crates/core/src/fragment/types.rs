//! Fragment data types.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// One data unit discovered at a watched location.
///
/// Fragments are immutable once observed; the controller only moves them
/// between bookkeeping sets. Identity and ordering are by identifier alone,
/// which keeps every persisted log deterministic and lets keys be attached
/// after listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    /// Path or identifier exactly as the source listed it.
    pub id: String,
    /// Lowest sequence number the fragment covers, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordering_key: Option<u32>,
    /// Highest sequence number, for fragments spanning several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ordering_key: Option<u32>,
}

impl Fragment {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ordering_key: None,
            last_ordering_key: None,
        }
    }

    pub fn with_ordering_key(mut self, key: u32) -> Self {
        self.ordering_key = Some(key);
        self.last_ordering_key = None;
        self
    }

    /// Attach the range `first..=last`.
    pub fn with_ordering_range(mut self, first: u32, last: u32) -> Self {
        self.ordering_key = Some(first.min(last));
        self.last_ordering_key = Some(first.max(last));
        self
    }

    /// Lowest and highest key covered, if any.
    pub fn key_bounds(&self) -> Option<(u32, u32)> {
        let first = self.ordering_key?;
        Some((first, self.last_ordering_key.unwrap_or(first).max(first)))
    }
}

impl PartialEq for Fragment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Fragment {}

impl PartialOrd for Fragment {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fragment {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for Fragment {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Derives ordering keys from fragment identifiers.
///
/// Only the final path component is inspected so that directory names such
/// as `Run2025G` or `/store/` never produce a key. When the pattern matches
/// several times the last match wins.
#[derive(Debug, Clone)]
pub struct OrderingKeyExtractor {
    pattern: Regex,
}

impl OrderingKeyExtractor {
    pub const DEFAULT_PATTERN: &'static str = r"ls(\d+)";

    pub fn new(pattern: &str) -> Result<Self, regex_lite::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn key_for(&self, id: &str) -> Option<u32> {
        let name = Path::new(id)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(id);

        self.pattern
            .captures_iter(name)
            .last()
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
    }

    /// Build a fragment for `id`, attaching its ordering key if one is found.
    pub fn fragment(&self, id: impl Into<String>) -> Fragment {
        let id = id.into();
        match self.key_for(&id) {
            Some(key) => Fragment::new(id).with_ordering_key(key),
            None => Fragment::new(id),
        }
    }
}

impl Default for OrderingKeyExtractor {
    fn default() -> Self {
        Self {
            pattern: Regex::new(Self::DEFAULT_PATTERN).expect("default pattern is valid"),
        }
    }
}
