//! Cache module for product listings
//!
//! This module provides a cache manager that keeps fetched product pages in
//! memory, partitioned into three buckets (all products, bestsellers, one
//! category) that share a single freshness timestamp. Stale or missing
//! buckets are refilled through the paginated fetcher.

mod manager;

pub use manager::{Bucket, CacheManager, Clock, ManualClock, SystemClock, DEFAULT_TTL_MINUTES};
