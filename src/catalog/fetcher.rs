//! Ordered, limited product queries with cursor continuation

use std::sync::Arc;

use tracing::debug;

use super::{CatalogError, QueryDescriptor};
use crate::data::{CursorPosition, DataSource, Product};

/// Continuation point after the last product of a page
///
/// Not `Clone`: a holder gives it up when it asks for the next page and gets
/// a new one back with that page.
#[derive(Debug, PartialEq, Eq)]
pub struct Cursor {
    position: CursorPosition,
}

impl Cursor {
    /// Cursor resuming after `product`, if it has a creation timestamp
    pub fn after(product: &Product) -> Option<Self> {
        product.created_at.map(|timestamp| Self {
            position: CursorPosition {
                timestamp,
                document_id: product.id.clone(),
            },
        })
    }

    pub fn position(&self) -> &CursorPosition {
        &self.position
    }
}

/// One page of raw, unfiltered products
#[derive(Debug)]
pub struct Page {
    pub items: Vec<Product>,
    /// Resumes after the last item, `None` for an empty page
    pub cursor: Option<Cursor>,
    pub has_more: bool,
}

/// Issues product queries against a data source
#[derive(Debug, Clone)]
pub struct PaginatedFetcher {
    source: Arc<dyn DataSource>,
}

impl PaginatedFetcher {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    /// Fetches the newest products matching the descriptor
    pub async fn fetch_first_page(
        &self,
        descriptor: &QueryDescriptor,
    ) -> Result<Page, CatalogError> {
        self.fetch(descriptor, None).await
    }

    /// Fetches the page following `cursor`
    ///
    /// # Returns
    /// * `Err(CatalogError::InvalidCursor)` if `cursor` is `None`; the caller
    ///   must start over with `fetch_first_page`
    pub async fn fetch_next_page(
        &self,
        descriptor: &QueryDescriptor,
        cursor: Option<&Cursor>,
    ) -> Result<Page, CatalogError> {
        let cursor = cursor.ok_or(CatalogError::InvalidCursor)?;
        self.fetch(descriptor, Some(cursor.position.clone())).await
    }

    async fn fetch(
        &self,
        descriptor: &QueryDescriptor,
        start_after: Option<CursorPosition>,
    ) -> Result<Page, CatalogError> {
        let mut query = descriptor.to_query();
        query.start_after = start_after;

        let docs = self.source.run_query(&query).await?;
        let items = Product::from_documents(&docs)?;

        let has_more =
            !items.is_empty() && descriptor.limit.map_or(true, |limit| items.len() >= limit);
        let cursor = items.last().and_then(Cursor::after);

        debug!(
            category = ?descriptor.category,
            bestseller_only = descriptor.bestseller_only,
            continued = query.start_after.is_some(),
            returned = items.len(),
            has_more,
            "fetched product page"
        );

        Ok(Page {
            items,
            cursor,
            has_more,
        })
    }
}
