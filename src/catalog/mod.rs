//! Product catalog queries
//!
//! A `QueryDescriptor` describes what a storefront view wants to list. The
//! `PaginatedFetcher` turns it into ordered, limited queries with cursor
//! continuation, and the `ProductFeed` accumulates pages for a view.

mod feed;
mod fetcher;

pub use feed::{LoadState, ProductFeed, FAILED_TO_LOAD};
pub use fetcher::{Cursor, Page, PaginatedFetcher};

use thiserror::Error;

use crate::data::{
    DataSourceError, FieldFilter, Product, Query, CREATED_AT_FIELD, PRODUCTS_COLLECTION,
};

/// Product field holding the category
pub const CATEGORY_FIELD: &str = "category";

/// Product field holding the bestseller flag
pub const BESTSELLER_FIELD: &str = "isBestseller";

/// Errors returned by catalog operations
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The data source failed; not retried here
    #[error(transparent)]
    Fetch(#[from] DataSourceError),

    /// A continuation was requested without a cursor from a previous page
    #[error("No pagination cursor: fetch the first page before loading more")]
    InvalidCursor,
}

/// What a view asks the catalog for
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QueryDescriptor {
    /// Only products in this category
    pub category: Option<String>,
    /// Only bestsellers
    pub bestseller_only: bool,
    /// Page size cap
    pub limit: Option<usize>,
    /// Hide out-of-stock products (applied client-side)
    pub exclude_out_of_stock: bool,
}

/// Result of applying a descriptor's client-side rules to a raw list
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Products that passed the filters, capped at the limit
    pub items: Vec<Product>,
    /// How many raw products were examined to produce `items`
    pub consumed: usize,
}

impl QueryDescriptor {
    /// Every product, newest first
    pub fn all() -> Self {
        Self::default()
    }

    pub fn category(category: &str) -> Self {
        Self {
            category: Some(category.to_string()),
            ..Self::default()
        }
    }

    pub fn bestsellers() -> Self {
        Self {
            bestseller_only: true,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_bestseller_only(mut self) -> Self {
        self.bestseller_only = true;
        self
    }

    pub fn in_stock_only(mut self) -> Self {
        self.exclude_out_of_stock = true;
        self
    }

    /// Builds the server-side query: newest first, equality filters, cap
    ///
    /// Stock is not indexed, so `exclude_out_of_stock` never reaches the
    /// data source.
    pub fn to_query(&self) -> Query {
        let mut query = Query::collection(PRODUCTS_COLLECTION).order_by_desc(CREATED_AT_FIELD);
        if let Some(category) = &self.category {
            query = query.filter(FieldFilter::equals_str(CATEGORY_FIELD, category));
        }
        if self.bestseller_only {
            query = query.filter(FieldFilter::equals_bool(BESTSELLER_FIELD, true));
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        query
    }

    /// Returns true if the product passes every rule of this descriptor
    pub fn matches(&self, product: &Product) -> bool {
        if let Some(category) = &self.category {
            if &product.category != category {
                return false;
            }
        }
        if self.bestseller_only && !product.is_bestseller {
            return false;
        }
        !(self.exclude_out_of_stock && product.out_of_stock)
    }

    /// Filters a raw, ordered list and applies the limit
    pub fn select(&self, raw: &[Product]) -> Selection {
        let mut items = Vec::new();
        let mut consumed = 0;

        for product in raw {
            if self.limit.is_some_and(|limit| items.len() >= limit) {
                break;
            }
            consumed += 1;
            if self.matches(product) {
                items.push(product.clone());
            }
        }

        Selection { items, consumed }
    }
}
