//! Mock fragment source for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::fragment::{Fragment, FragmentSource, SourceError};

/// Mock implementation of the FragmentSource trait.
///
/// Provides controllable behavior for testing:
/// - Per-location listings that tests grow over time
/// - Fragments whose backing data has gone missing
/// - One-shot listing failures
///
/// # Example
///
/// ```rust,ignore
/// use runloop_core::testing::{fixtures, MockFragmentSource};
///
/// let source = MockFragmentSource::new();
/// source
///     .add_fragments(&fixtures::location("398348"), fixtures::fragments("398348", [1, 2, 3]))
///     .await;
///
/// let listed = source.list(&fixtures::location("398348")).await?;
/// assert_eq!(listed.len(), 3);
/// ```
#[derive(Debug)]
pub struct MockFragmentSource {
    /// Listing per location.
    listings: Arc<RwLock<BTreeMap<String, BTreeSet<Fragment>>>>,
    /// Ids of fragments whose data no longer exists.
    missing: Arc<RwLock<BTreeSet<String>>>,
    /// Locations passed to `list`, in call order.
    list_calls: Arc<RwLock<Vec<String>>>,
    /// If set, the next `list` call will fail with this error.
    next_error: Arc<RwLock<Option<SourceError>>>,
}

impl Default for MockFragmentSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFragmentSource {
    /// Create a new mock source with empty listings.
    pub fn new() -> Self {
        Self {
            listings: Arc::new(RwLock::new(BTreeMap::new())),
            missing: Arc::new(RwLock::new(BTreeSet::new())),
            list_calls: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Replace the listing of `location`.
    pub async fn set_fragments(&self, location: &str, fragments: impl IntoIterator<Item = Fragment>) {
        self.listings
            .write()
            .await
            .insert(location.to_string(), fragments.into_iter().collect());
    }

    /// Add fragments to the listing of `location`.
    pub async fn add_fragments(&self, location: &str, fragments: impl IntoIterator<Item = Fragment>) {
        self.listings
            .write()
            .await
            .entry(location.to_string())
            .or_default()
            .extend(fragments);
    }

    /// Make `exists` report `false` for the fragment with this id.
    pub async fn mark_missing(&self, id: &str) {
        self.missing.write().await.insert(id.to_string());
    }

    /// Set an error to be returned by the next `list` call.
    pub async fn set_next_error(&self, error: SourceError) {
        *self.next_error.write().await = Some(error);
    }

    /// Get all locations listed so far.
    pub async fn list_calls(&self) -> Vec<String> {
        self.list_calls.read().await.clone()
    }

    /// Number of `list` calls so far.
    pub async fn list_count(&self) -> usize {
        self.list_calls.read().await.len()
    }
}

#[async_trait]
impl FragmentSource for MockFragmentSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list(&self, location: &str) -> Result<BTreeSet<Fragment>, SourceError> {
        self.list_calls.write().await.push(location.to_string());

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        Ok(self
            .listings
            .read()
            .await
            .get(location)
            .cloned()
            .unwrap_or_default())
    }

    async fn exists(&self, fragment: &Fragment) -> Result<bool, SourceError> {
        Ok(!self.missing.read().await.contains(&fragment.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_grows() {
        let source = MockFragmentSource::new();
        source.add_fragments("loc", [Fragment::new("a")]).await;
        source.add_fragments("loc", [Fragment::new("b")]).await;

        assert_eq!(source.list("loc").await.unwrap().len(), 2);
        assert!(source.list("other").await.unwrap().is_empty());
        assert_eq!(source.list_calls().await, vec!["loc", "other"]);
    }

    #[tokio::test]
    async fn test_next_error_is_one_shot() {
        let source = MockFragmentSource::new();
        source
            .set_next_error(SourceError::listing_failed("loc", "boom"))
            .await;

        assert!(source.list("loc").await.is_err());
        assert!(source.list("loc").await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_fragments() {
        let source = MockFragmentSource::new();
        source.mark_missing("a").await;

        assert!(!source.exists(&Fragment::new("a")).await.unwrap());
        assert!(source.exists(&Fragment::new("b")).await.unwrap());
    }
}
