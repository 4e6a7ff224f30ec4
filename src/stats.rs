//! Dashboard statistics
//!
//! Counts shown on the admin dashboard, computed from one unfiltered scan of
//! each collection.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::data::{
    decode_lenient, DataSource, DataSourceError, Product, Query, Review, PRODUCTS_COLLECTION,
    REVIEWS_COLLECTION,
};
use crate::reviews::decode_reviews;

/// Product counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProductStats {
    pub total: usize,
    pub bestsellers: usize,
    /// Featured in the hero banner
    pub hero: usize,
    pub out_of_stock: usize,
    /// Products per category; uncategorised products count under ""
    pub by_category: BTreeMap<String, usize>,
}

impl ProductStats {
    pub fn from_products(products: &[Product]) -> Self {
        let mut stats = Self {
            total: products.len(),
            ..Self::default()
        };
        for product in products {
            stats.bestsellers += usize::from(product.is_bestseller);
            stats.hero += usize::from(product.show_in_hero);
            stats.out_of_stock += usize::from(product.out_of_stock);
            *stats
                .by_category
                .entry(product.category.clone())
                .or_default() += 1;
        }
        stats
    }
}

/// Review counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReviewStats {
    pub total: usize,
    pub approved: usize,
    /// Waiting for approval
    pub pending: usize,
    pub admin_added: usize,
    /// Mean rating of approved reviews with a valid rating
    pub average_rating: Option<f64>,
}

impl ReviewStats {
    pub fn from_reviews(reviews: &[Review]) -> Self {
        let approved: Vec<&Review> = reviews.iter().filter(|r| r.approved).collect();
        let rated: Vec<u8> = approved
            .iter()
            .map(|r| r.rating)
            .filter(|rating| *rating > 0)
            .collect();
        let average_rating = if rated.is_empty() {
            None
        } else {
            let sum: u32 = rated.iter().map(|r| u32::from(*r)).sum();
            Some(f64::from(sum) / rated.len() as f64)
        };

        Self {
            total: reviews.len(),
            approved: approved.len(),
            pending: reviews.len() - approved.len(),
            admin_added: reviews.iter().filter(|r| r.is_admin_added).count(),
            average_rating,
        }
    }
}

/// Everything the dashboard shows
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogStats {
    pub products: ProductStats,
    pub reviews: ReviewStats,
}

impl CatalogStats {
    /// Scans both collections concurrently and counts
    ///
    /// Records that cannot be decoded are skipped, as in the review feed.
    pub async fn collect(source: &dyn DataSource) -> Result<Self, DataSourceError> {
        let products_query = Query::collection(PRODUCTS_COLLECTION);
        let reviews_query = Query::collection(REVIEWS_COLLECTION);

        let (products, reviews) = futures::join!(
            source.run_query(&products_query),
            source.run_query(&reviews_query)
        );
        let products = decode_lenient(&products?, "product", Product::from_document);
        let reviews = decode_reviews(&reviews?);

        Ok(Self {
            products: ProductStats::from_products(&products),
            reviews: ReviewStats::from_reviews(&reviews),
        })
    }
}
