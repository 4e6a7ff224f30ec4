//! Public review feed
//!
//! Historical review records are not reliably well formed and the combined
//! filter may not be indexed, so the feed walks down a ladder of attempts
//! instead of failing the page:
//!
//! 1. `Composite`: both gates filtered by the data source
//! 2. `Degraded`: admin gate only, approval checked client-side
//! 3. `Empty`: nothing to show, the last error kept for developers
//!
//! Every path ends with a list, possibly empty.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Environment;
use crate::data::review::{sort_for_display, ADMIN_ADDED_FIELD, APPROVED_FIELD};
use crate::data::{
    decode_lenient, DataSource, DataSourceError, Document, FieldFilter, Query, Review,
    REVIEWS_COLLECTION,
};

/// Rung of the fallback ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptLevel {
    /// Both gates filtered server-side
    Composite,
    /// Admin gate server-side, approval client-side
    Degraded,
    /// No query left to try
    Empty,
}

impl AttemptLevel {
    /// Level to move to when an attempt at this level fails
    pub fn on_failure(self) -> AttemptLevel {
        match self {
            AttemptLevel::Composite => AttemptLevel::Degraded,
            AttemptLevel::Degraded | AttemptLevel::Empty => AttemptLevel::Empty,
        }
    }
}

/// Counters from the unfiltered diagnostic scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewDiagnostics {
    pub total: usize,
    /// Approved but not admin-added
    pub approved_only: usize,
    /// Admin-added but not approved
    pub admin_only: usize,
    pub both_flags: usize,
    pub has_timestamp: usize,
    /// Would be shown on the site
    pub eligible: usize,
}

impl ReviewDiagnostics {
    pub fn from_reviews(reviews: &[Review]) -> Self {
        let mut diagnostics = Self {
            total: reviews.len(),
            ..Self::default()
        };
        for review in reviews {
            match (review.approved, review.is_admin_added) {
                (true, true) => diagnostics.both_flags += 1,
                (true, false) => diagnostics.approved_only += 1,
                (false, true) => diagnostics.admin_only += 1,
                (false, false) => {}
            }
            if review.created_at.is_some() {
                diagnostics.has_timestamp += 1;
            }
            if review.is_displayable() {
                diagnostics.eligible += 1;
            }
        }
        diagnostics
    }
}

/// Outcome of building the review feed
#[derive(Debug, Clone)]
pub struct ReviewFeed {
    /// Displayable reviews, newest first
    pub items: Vec<Review>,
    /// Level that produced `items`
    pub level: AttemptLevel,
    /// Error that exhausted the ladder, if it was exhausted
    pub diagnostic_error: Option<String>,
    /// Counters from the diagnostic scan, if it succeeded
    pub diagnostics: Option<ReviewDiagnostics>,
}

impl ReviewFeed {
    /// The diagnostic error, but only outside production
    pub fn visible_diagnostic(&self, environment: Environment) -> Option<&str> {
        if environment.is_development() {
            self.diagnostic_error.as_deref()
        } else {
            None
        }
    }
}

/// Builds the public review feed from a data source
#[derive(Debug, Clone)]
pub struct ReviewFeedExecutor {
    source: Arc<dyn DataSource>,
}

impl ReviewFeedExecutor {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }

    /// Runs the diagnostic scan, then walks the attempt ladder
    pub async fn execute(&self) -> ReviewFeed {
        let diagnostics = match self.scan_diagnostics().await {
            Ok(diagnostics) => {
                info!(
                    total = diagnostics.total,
                    approved_only = diagnostics.approved_only,
                    admin_only = diagnostics.admin_only,
                    both_flags = diagnostics.both_flags,
                    has_timestamp = diagnostics.has_timestamp,
                    eligible = diagnostics.eligible,
                    "review diagnostics"
                );
                Some(diagnostics)
            }
            Err(e) => {
                warn!(error = %e, "review diagnostic scan failed");
                None
            }
        };

        let mut level = AttemptLevel::Composite;
        let mut last_error: Option<DataSourceError> = None;

        loop {
            let attempt = match level {
                AttemptLevel::Composite => self.composite().await,
                AttemptLevel::Degraded => self.degraded().await,
                AttemptLevel::Empty => {
                    return ReviewFeed {
                        items: Vec::new(),
                        level,
                        diagnostic_error: last_error.map(|e| e.to_string()),
                        diagnostics,
                    };
                }
            };

            match attempt {
                Ok(items) => {
                    debug!(?level, count = items.len(), "review feed ready");
                    return ReviewFeed {
                        items,
                        level,
                        diagnostic_error: None,
                        diagnostics,
                    };
                }
                Err(e) => {
                    let next = level.on_failure();
                    warn!(?level, ?next, missing_index = e.is_missing_index(), error = %e, "review query failed");
                    last_error = Some(e);
                    level = next;
                }
            }
        }
    }

    /// One unfiltered pass over every review, for counters only
    pub async fn scan_diagnostics(&self) -> Result<ReviewDiagnostics, DataSourceError> {
        let docs = self
            .source
            .run_query(&Query::collection(REVIEWS_COLLECTION))
            .await?;
        Ok(ReviewDiagnostics::from_reviews(&decode_reviews(&docs)))
    }

    /// Both gates filtered by the data source
    pub async fn composite(&self) -> Result<Vec<Review>, DataSourceError> {
        let query = Query::collection(REVIEWS_COLLECTION)
            .filter(FieldFilter::equals_bool(APPROVED_FIELD, true))
            .filter(FieldFilter::equals_bool(ADMIN_ADDED_FIELD, true));
        let docs = self.source.run_query(&query).await?;
        Ok(sort_for_display(decode_reviews(&docs)))
    }

    /// Admin gate filtered by the data source, approval checked here
    pub async fn degraded(&self) -> Result<Vec<Review>, DataSourceError> {
        let query = Query::collection(REVIEWS_COLLECTION)
            .filter(FieldFilter::equals_bool(ADMIN_ADDED_FIELD, true));
        let docs = self.source.run_query(&query).await?;
        let approved = decode_reviews(&docs)
            .into_iter()
            .filter(|r| r.approved)
            .collect();
        Ok(sort_for_display(approved))
    }
}

/// Decodes reviews, skipping records that cannot be decoded at all
pub(crate) fn decode_reviews(docs: &[Document]) -> Vec<Review> {
    decode_lenient(docs, "review", Review::from_document)
}
