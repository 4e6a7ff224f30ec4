//! Product list state for a storefront view
//!
//! A `ProductFeed` owns the descriptor a view is showing, the products
//! accumulated so far and the cursor for the next page. The first page comes
//! through the shared cache; later pages go straight to the fetcher.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{CatalogError, Cursor, QueryDescriptor};
use crate::cache::CacheManager;
use crate::data::Product;

/// Message shown in place of the list when loading fails
pub const FAILED_TO_LOAD: &str = "Failed to load products";

/// Loading status of a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing requested yet
    Idle,
    Loading,
    Ready,
    /// Loading failed; holds the user-facing message
    Failed(String),
}

/// Accumulating, paginated product list
#[derive(Debug)]
pub struct ProductFeed {
    cache: Arc<CacheManager>,
    descriptor: QueryDescriptor,
    items: Vec<Product>,
    /// Taken while a continuation is in flight
    cursor: Option<Cursor>,
    has_more: bool,
    state: LoadState,
}

impl ProductFeed {
    pub fn new(cache: Arc<CacheManager>, descriptor: QueryDescriptor) -> Self {
        Self {
            cache,
            descriptor,
            items: Vec::new(),
            cursor: None,
            has_more: false,
            state: LoadState::Idle,
        }
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    pub fn items(&self) -> &[Product] {
        &self.items
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// Switches to another descriptor
    ///
    /// A different descriptor discards the list and the cursor and puts the
    /// feed back to `Idle`. Returns true if anything changed.
    pub fn set_descriptor(&mut self, descriptor: QueryDescriptor) -> bool {
        if descriptor == self.descriptor {
            return false;
        }
        self.descriptor = descriptor;
        self.items.clear();
        self.cursor = None;
        self.has_more = false;
        self.state = LoadState::Idle;
        true
    }

    /// Loads the first page, replacing the current list
    ///
    /// # Arguments
    /// * `force_revalidate` - Bypass the cache freshness check
    pub async fn load(&mut self, force_revalidate: bool) -> Result<&[Product], CatalogError> {
        self.state = LoadState::Loading;

        match self.cache.get(&self.descriptor, force_revalidate).await {
            Ok(page) => {
                self.items = page.items;
                self.cursor = page.cursor;
                self.has_more = page.has_more;
                self.state = LoadState::Ready;
                Ok(&self.items)
            }
            Err(e) => {
                warn!(error = %e, "product feed load failed");
                self.state = LoadState::Failed(FAILED_TO_LOAD.to_string());
                Err(e)
            }
        }
    }

    /// Appends the next page to the list
    ///
    /// Returns the number of products appended. Once the feed reports no
    /// more pages this is a no-op returning 0. Calling it before `load`
    /// fails with `CatalogError::InvalidCursor`.
    pub async fn load_more(&mut self) -> Result<usize, CatalogError> {
        if self.state == LoadState::Ready && !self.has_more {
            return Ok(0);
        }

        let cursor = self.cursor.take();
        let page = match self
            .cache
            .fetcher()
            .fetch_next_page(&self.descriptor, cursor.as_ref())
            .await
        {
            Ok(page) => page,
            Err(e) => {
                // Keep the old cursor so the same page can be retried
                self.cursor = cursor;
                return Err(e);
            }
        };

        let before = self.items.len();
        self.items.extend(
            page.items
                .into_iter()
                .filter(|p| self.descriptor.matches(p)),
        );
        self.cursor = page.cursor;
        self.has_more = page.has_more;

        let appended = self.items.len() - before;
        debug!(appended, total = self.items.len(), has_more = self.has_more, "loaded more products");
        Ok(appended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PaginatedFetcher;
    use crate::data::{Document, MemoryDataSource, PRODUCTS_COLLECTION};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn seeded_source(count: usize) -> Arc<MemoryDataSource> {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut source = MemoryDataSource::new();
        for i in 0..count {
            let fields = json!({
                "name": format!("Item {}", i),
                "category": "spices",
                "outOfStock": i == 1,
                "createdAt": (base + Duration::hours(i as i64)).to_rfc3339(),
            });
            source = source.with_document(
                PRODUCTS_COLLECTION,
                Document::new(format!("s{}", i), fields.as_object().cloned().unwrap()),
            );
        }
        Arc::new(source)
    }

    fn feed(source: Arc<MemoryDataSource>, descriptor: QueryDescriptor) -> ProductFeed {
        let cache = CacheManager::new(PaginatedFetcher::new(source));
        ProductFeed::new(Arc::new(cache), descriptor)
    }

    #[tokio::test]
    async fn test_load_then_load_more_appends() {
        let source = seeded_source(5);
        let mut feed = feed(source, QueryDescriptor::category("spices").with_limit(2));

        feed.load(false).await.unwrap();
        assert_eq!(feed.items().len(), 2);
        assert_eq!(*feed.state(), LoadState::Ready);

        let appended = feed.load_more().await.unwrap();
        assert_eq!(appended, 2);

        let appended = feed.load_more().await.unwrap();
        assert_eq!(appended, 1);
        assert!(!feed.has_more());

        let ids: Vec<&str> = feed.items().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["s4", "s3", "s2", "s1", "s0"]);

        assert_eq!(feed.load_more().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_load_more_filters_out_of_stock() {
        let source = seeded_source(4);
        let mut feed = feed(
            source,
            QueryDescriptor::category("spices").with_limit(2).in_stock_only(),
        );

        feed.load(false).await.unwrap();
        feed.load_more().await.unwrap();

        // s1 is out of stock; the second page is short by one
        let ids: Vec<&str> = feed.items().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["s3", "s2", "s0"]);
    }

    #[tokio::test]
    async fn test_load_more_before_load_is_invalid() {
        let source = seeded_source(3);
        let mut feed = feed(source, QueryDescriptor::all().with_limit(2));

        let result = feed.load_more().await;

        assert!(matches!(result, Err(CatalogError::InvalidCursor)));
    }

    #[tokio::test]
    async fn test_set_descriptor_discards_cursor() {
        let source = seeded_source(3);
        let mut feed = feed(source, QueryDescriptor::all().with_limit(2));
        feed.load(false).await.unwrap();

        assert!(!feed.set_descriptor(QueryDescriptor::all().with_limit(2)));
        assert!(feed.set_descriptor(QueryDescriptor::bestsellers()));

        assert!(feed.items().is_empty());
        assert_eq!(*feed.state(), LoadState::Idle);
        assert!(matches!(
            feed.load_more().await,
            Err(CatalogError::InvalidCursor)
        ));
    }

    #[tokio::test]
    async fn test_failed_load_sets_generic_message() {
        let source = seeded_source(3);
        source.set_failing(PRODUCTS_COLLECTION, true).await;
        let mut feed = feed(source, QueryDescriptor::all());

        assert!(feed.load(false).await.is_err());
        assert_eq!(*feed.state(), LoadState::Failed(FAILED_TO_LOAD.to_string()));
    }

    #[tokio::test]
    async fn test_failed_load_more_keeps_cursor_for_retry() {
        let source = seeded_source(4);
        let mut feed = feed(source.clone(), QueryDescriptor::all().with_limit(2));
        feed.load(false).await.unwrap();

        source.set_failing(PRODUCTS_COLLECTION, true).await;
        assert!(feed.load_more().await.is_err());

        source.set_failing(PRODUCTS_COLLECTION, false).await;
        assert_eq!(feed.load_more().await.unwrap(), 2);
        assert_eq!(feed.items().len(), 4);
    }
}
