//! In-memory cache for product listings
//!
//! Provides a `CacheManager` that keeps the raw first page of each query
//! bucket and serves repeat requests from memory while the cache is fresh.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::catalog::{CatalogError, Cursor, Page, PaginatedFetcher, QueryDescriptor};
use crate::data::{Product, PRODUCTS_COLLECTION};

/// Freshness window shared by all buckets, in minutes
pub const DEFAULT_TTL_MINUTES: i64 = 10;

/// Source of the current time
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
///
/// Useful for testing freshness boundaries without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Cache partition for one query shape
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Unfiltered listing
    All,
    /// Bestseller-only listing
    Bestsellers,
    /// Listing for one category
    Category(String),
}

impl Bucket {
    /// Picks the bucket for a descriptor
    ///
    /// Category wins over bestseller; a descriptor with both lands in the
    /// category bucket and has the bestseller rule applied client-side.
    pub fn for_descriptor(descriptor: &QueryDescriptor) -> Self {
        if let Some(category) = &descriptor.category {
            Bucket::Category(category.clone())
        } else if descriptor.bestseller_only {
            Bucket::Bestsellers
        } else {
            Bucket::All
        }
    }

    /// Descriptor used to fill this bucket: only the bucket's own filter
    fn fill_descriptor(&self, limit: Option<usize>) -> QueryDescriptor {
        let descriptor = match self {
            Bucket::All => QueryDescriptor::all(),
            Bucket::Bestsellers => QueryDescriptor::bestsellers(),
            Bucket::Category(category) => QueryDescriptor::category(category),
        };
        QueryDescriptor { limit, ..descriptor }
    }
}

/// Raw first page stored for a bucket
#[derive(Debug, Clone)]
struct CacheEntry {
    /// Unfiltered products as returned by the data source
    items: Vec<Product>,
    /// Whether the data source had more beyond these
    has_more: bool,
}

impl CacheEntry {
    /// Applies a descriptor's client-side rules to the raw products
    fn serve(&self, descriptor: &QueryDescriptor) -> Page {
        let selection = descriptor.select(&self.items);
        let cursor = self.items[..selection.consumed]
            .last()
            .and_then(Cursor::after);
        let has_more = selection.consumed < self.items.len() || self.has_more;

        Page {
            items: selection.items,
            cursor,
            has_more,
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    buckets: HashMap<Bucket, CacheEntry>,
    /// Last write to any bucket
    updated_at: Option<DateTime<Utc>>,
}

impl CacheState {
    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.updated_at.is_some_and(|at| now - at < ttl)
    }
}

/// Short-circuits repeated product queries within a freshness window
///
/// One timestamp governs every bucket: writing any bucket makes all of them
/// fresh again. Entries leave only by expiry or `invalidate`. Construct one
/// per application and share it behind an `Arc`.
#[derive(Debug)]
pub struct CacheManager {
    fetcher: PaginatedFetcher,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    state: RwLock<CacheState>,
}

impl CacheManager {
    /// Creates a cache with the default ten-minute TTL and the wall clock
    pub fn new(fetcher: PaginatedFetcher) -> Self {
        Self::with_ttl(fetcher, Duration::minutes(DEFAULT_TTL_MINUTES))
    }

    pub fn with_ttl(fetcher: PaginatedFetcher, ttl: Duration) -> Self {
        Self::with_clock(fetcher, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(fetcher: PaginatedFetcher, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            fetcher,
            ttl,
            clock,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn fetcher(&self) -> &PaginatedFetcher {
        &self.fetcher
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the first page for a descriptor
    ///
    /// # Arguments
    /// * `descriptor` - What to list
    /// * `force_revalidate` - Skip the freshness check and refetch
    ///
    /// # Behavior
    /// - Fresh bucket: filters and limits the cached raw products
    /// - Otherwise: fetches the bucket's raw page, stores it, and serves it
    ///   through the same filters
    /// - On error nothing is stored and the previous entry stays as it was
    pub async fn get(
        &self,
        descriptor: &QueryDescriptor,
        force_revalidate: bool,
    ) -> Result<Page, CatalogError> {
        let bucket = Bucket::for_descriptor(descriptor);

        if !force_revalidate {
            let state = self.state.read().await;
            if state.is_fresh(self.clock.now(), self.ttl) {
                if let Some(entry) = state.buckets.get(&bucket) {
                    debug!(?bucket, "product cache hit");
                    return Ok(entry.serve(descriptor));
                }
            }
        }

        debug!(?bucket, force_revalidate, "product cache miss");
        let page = self
            .fetcher
            .fetch_first_page(&bucket.fill_descriptor(descriptor.limit))
            .await
            .inspect_err(|e| warn!(?bucket, error = %e, "product fetch failed, cache untouched"))?;

        let entry = CacheEntry {
            items: page.items,
            has_more: page.has_more,
        };
        let served = entry.serve(descriptor);

        let mut state = self.state.write().await;
        state.buckets.insert(bucket, entry);
        state.updated_at = Some(self.clock.now());

        Ok(served)
    }

    /// Drops every bucket
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.buckets.clear();
        state.updated_at = None;
        debug!("product cache invalidated");
    }

    /// Raw products stored for a bucket, fresh or not
    pub async fn cached(&self, bucket: &Bucket) -> Option<Vec<Product>> {
        let state = self.state.read().await;
        state.buckets.get(bucket).map(|entry| entry.items.clone())
    }

    /// Whether cached buckets are inside the freshness window
    pub async fn is_fresh(&self) -> bool {
        self.state.read().await.is_fresh(self.clock.now(), self.ttl)
    }

    /// Looks a product up in the fresh buckets
    pub async fn find_cached(&self, id: &str) -> Option<Product> {
        let state = self.state.read().await;
        if !state.is_fresh(self.clock.now(), self.ttl) {
            return None;
        }
        state
            .buckets
            .values()
            .flat_map(|entry| entry.items.iter())
            .find(|p| p.id == id)
            .cloned()
    }

    /// Product detail: cached copy if fresh, otherwise a direct lookup
    pub async fn product(&self, id: &str) -> Result<Option<Product>, CatalogError> {
        if let Some(product) = self.find_cached(id).await {
            debug!(id, "product detail served from cache");
            return Ok(Some(product));
        }

        let doc = self
            .fetcher
            .source()
            .get_document(PRODUCTS_COLLECTION, id)
            .await?;
        match doc {
            Some(doc) => Ok(Some(Product::from_document(&doc)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Document, MemoryDataSource};
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn product_doc(id: &str, fields: Value) -> Document {
        Document::new(id, fields.as_object().cloned().unwrap())
    }

    /// A(visible spices), B(out-of-stock spices), C(bestseller oilseeds), D(oilseeds)
    fn catalog_source() -> Arc<MemoryDataSource> {
        Arc::new(
            MemoryDataSource::new()
                .with_document(
                    PRODUCTS_COLLECTION,
                    product_doc("A", json!({"category": "spices", "createdAt": "2024-05-04T00:00:00Z"})),
                )
                .with_document(
                    PRODUCTS_COLLECTION,
                    product_doc(
                        "B",
                        json!({"category": "spices", "outOfStock": true, "createdAt": "2024-05-03T00:00:00Z"}),
                    ),
                )
                .with_document(
                    PRODUCTS_COLLECTION,
                    product_doc(
                        "C",
                        json!({"category": "oilseeds", "isBestseller": true, "createdAt": "2024-05-02T00:00:00Z"}),
                    ),
                )
                .with_document(
                    PRODUCTS_COLLECTION,
                    product_doc("D", json!({"category": "oilseeds", "createdAt": "2024-05-01T00:00:00Z"})),
                ),
        )
    }

    fn cache_with_clock(source: Arc<MemoryDataSource>) -> (CacheManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let cache = CacheManager::with_clock(
            PaginatedFetcher::new(source),
            Duration::minutes(DEFAULT_TTL_MINUTES),
            clock.clone(),
        );
        (cache, clock)
    }

    fn ids(products: &[Product]) -> Vec<&str> {
        products.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_bucket_selection_order() {
        assert_eq!(Bucket::for_descriptor(&QueryDescriptor::all()), Bucket::All);
        assert_eq!(
            Bucket::for_descriptor(&QueryDescriptor::bestsellers()),
            Bucket::Bestsellers
        );
        assert_eq!(
            Bucket::for_descriptor(&QueryDescriptor::category("oilseeds").with_bestseller_only()),
            Bucket::Category("oilseeds".to_string())
        );
    }

    #[tokio::test]
    async fn test_second_call_within_ttl_is_served_from_cache() {
        let source = catalog_source();
        let (cache, clock) = cache_with_clock(source.clone());
        let descriptor = QueryDescriptor::all().with_limit(3);

        let first = cache.get(&descriptor, false).await.unwrap();
        clock.advance(Duration::minutes(9));
        let second = cache.get(&descriptor, false).await.unwrap();

        assert_eq!(source.query_count(), 1);
        assert_eq!(first.items, second.items);
        assert_eq!(first.has_more, second.has_more);
        assert_eq!(first.cursor, second.cursor);
    }

    #[tokio::test]
    async fn test_expired_cache_refetches() {
        let source = catalog_source();
        let (cache, clock) = cache_with_clock(source.clone());
        let descriptor = QueryDescriptor::all();

        cache.get(&descriptor, false).await.unwrap();
        clock.advance(Duration::minutes(DEFAULT_TTL_MINUTES));
        cache.get(&descriptor, false).await.unwrap();

        assert_eq!(source.query_count(), 2);
    }

    #[tokio::test]
    async fn test_force_revalidate_refetches() {
        let source = catalog_source();
        let (cache, _clock) = cache_with_clock(source.clone());

        cache.get(&QueryDescriptor::all(), false).await.unwrap();
        cache.get(&QueryDescriptor::all(), true).await.unwrap();

        assert_eq!(source.query_count(), 2);
    }

    #[tokio::test]
    async fn test_repeated_hits_are_identical() {
        let source = catalog_source();
        let (cache, _clock) = cache_with_clock(source);
        let descriptor = QueryDescriptor::category("spices").in_stock_only();

        let first = cache.get(&descriptor, false).await.unwrap();
        for _ in 0..5 {
            let again = cache.get(&descriptor, false).await.unwrap();
            assert_eq!(again.items, first.items);
        }
    }

    #[tokio::test]
    async fn test_out_of_stock_filtered_on_miss_and_hit() {
        let source = catalog_source();
        let (cache, _clock) = cache_with_clock(source);
        let descriptor = QueryDescriptor::category("spices").in_stock_only();

        let miss = cache.get(&descriptor, false).await.unwrap();
        let hit = cache.get(&descriptor, false).await.unwrap();

        assert_eq!(ids(&miss.items), vec!["A"]);
        assert_eq!(ids(&hit.items), vec!["A"]);

        // The bucket keeps the unfiltered rows
        let raw = cache
            .cached(&Bucket::Category("spices".to_string()))
            .await
            .unwrap();
        assert_eq!(ids(&raw), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_bestseller_and_category_buckets_stay_separate() {
        let source = catalog_source();
        let (cache, _clock) = cache_with_clock(source);

        let bestsellers = cache.get(&QueryDescriptor::bestsellers(), false).await.unwrap();
        let combined = cache
            .get(
                &QueryDescriptor::category("oilseeds").with_bestseller_only(),
                false,
            )
            .await
            .unwrap();

        assert_eq!(ids(&bestsellers.items), vec!["C"]);
        assert_eq!(ids(&combined.items), vec!["C"]);

        let category_raw = cache
            .cached(&Bucket::Category("oilseeds".to_string()))
            .await
            .unwrap();
        assert_eq!(ids(&category_raw), vec!["C", "D"]);

        let bestseller_raw = cache.cached(&Bucket::Bestsellers).await.unwrap();
        assert_eq!(ids(&bestseller_raw), vec!["C"]);
    }

    #[tokio::test]
    async fn test_writing_one_bucket_refreshes_shared_clock() {
        let source = catalog_source();
        let (cache, clock) = cache_with_clock(source.clone());

        cache.get(&QueryDescriptor::all(), false).await.unwrap();
        clock.advance(Duration::minutes(8));
        cache.get(&QueryDescriptor::bestsellers(), false).await.unwrap();
        clock.advance(Duration::minutes(8));

        // 16 minutes after the first write, but the shared clock was reset at 8
        cache.get(&QueryDescriptor::all(), false).await.unwrap();
        assert_eq!(source.query_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_keeps_previous_entry() {
        let source = catalog_source();
        let (cache, clock) = cache_with_clock(source.clone());

        cache.get(&QueryDescriptor::all(), false).await.unwrap();
        clock.advance(Duration::minutes(DEFAULT_TTL_MINUTES + 1));
        source.set_failing(PRODUCTS_COLLECTION, true).await;

        let result = cache.get(&QueryDescriptor::all(), false).await;

        assert!(matches!(result, Err(CatalogError::Fetch(_))));
        let raw = cache.cached(&Bucket::All).await.unwrap();
        assert_eq!(raw.len(), 4);
    }

    #[tokio::test]
    async fn test_hit_with_smaller_limit_resumes_after_served_items() {
        let source = catalog_source();
        let (cache, _clock) = cache_with_clock(source);

        cache.get(&QueryDescriptor::all().with_limit(4), false).await.unwrap();
        let page = cache.get(&QueryDescriptor::all().with_limit(2), false).await.unwrap();

        assert_eq!(ids(&page.items), vec!["A", "B"]);
        assert!(page.has_more);
        assert_eq!(page.cursor.unwrap().position().document_id, "B");
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let source = catalog_source();
        let (cache, _clock) = cache_with_clock(source.clone());

        cache.get(&QueryDescriptor::all(), false).await.unwrap();
        cache.invalidate().await;

        assert!(!cache.is_fresh().await);
        assert!(cache.cached(&Bucket::All).await.is_none());
        cache.get(&QueryDescriptor::all(), false).await.unwrap();
        assert_eq!(source.query_count(), 2);
    }

    #[tokio::test]
    async fn test_product_detail_prefers_fresh_cache() {
        let source = catalog_source();
        let (cache, clock) = cache_with_clock(source.clone());

        cache.get(&QueryDescriptor::all(), false).await.unwrap();
        let cached = cache.find_cached("C").await;
        assert_eq!(cached.map(|p| p.category), Some("oilseeds".to_string()));

        clock.advance(Duration::minutes(DEFAULT_TTL_MINUTES));
        assert!(cache.find_cached("C").await.is_none());

        let direct = cache.product("C").await.unwrap();
        assert_eq!(direct.map(|p| p.id), Some("C".to_string()));
        assert!(cache.product("missing").await.unwrap().is_none());
    }
}
