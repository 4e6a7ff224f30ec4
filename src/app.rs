//! Application wiring for the catalog client
//!
//! Owns the data source and the shared product cache, and renders each
//! command's output as text.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::cache::CacheManager;
use crate::catalog::{CatalogError, PaginatedFetcher, ProductFeed, FAILED_TO_LOAD};
use crate::cli::{CliError, Command, ProductArgs};
use crate::config::{ConfigError, Settings};
use crate::data::{DataSource, DataSourceError, FirestoreClient, MemoryDataSource, Product, Review};
use crate::reviews::ReviewFeedExecutor;
use crate::stats::CatalogStats;

/// Errors surfaced by the binary
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cli(#[from] CliError),

    #[error(transparent)]
    Data(#[from] DataSourceError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Product listing failed; details are logged, not shown
    #[error("{}", FAILED_TO_LOAD)]
    LoadFailed,

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Main application struct holding the data source and product cache
#[derive(Debug)]
pub struct App {
    settings: Settings,
    source: Arc<dyn DataSource>,
    cache: Arc<CacheManager>,
}

impl App {
    /// Creates an App over an existing data source
    pub fn new(settings: Settings, source: Arc<dyn DataSource>) -> Self {
        let fetcher = PaginatedFetcher::new(source.clone());
        let cache = CacheManager::with_ttl(fetcher, settings.cache_ttl());
        Self {
            settings,
            source,
            cache: Arc::new(cache),
        }
    }

    /// Creates an App from settings
    ///
    /// # Arguments
    /// * `settings` - Loaded settings
    /// * `fixture` - JSON fixture to serve from memory instead of the hosted database
    pub fn from_settings(settings: Settings, fixture: Option<&Path>) -> Result<Self, AppError> {
        let source: Arc<dyn DataSource> = match fixture {
            Some(path) => {
                info!(path = %path.display(), "using fixture data");
                Arc::new(MemoryDataSource::from_json_file(path)?)
            }
            None => {
                let project_id = settings.require_project_id()?;
                let mut client = FirestoreClient::new(project_id)
                    .with_database(&settings.database)
                    .with_api_key(settings.api_key.clone());
                if let Some(base_url) = &settings.base_url {
                    client = client.with_base_url(base_url);
                }
                info!(project_id, "using hosted database");
                Arc::new(client)
            }
        };
        Ok(Self::new(settings, source))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Runs one command and returns its output
    pub async fn run(&self, command: &Command) -> Result<String, AppError> {
        match command {
            Command::Products(args) => self.products(args).await,
            Command::Product { id } => self.product(id).await,
            Command::Reviews => Ok(self.reviews().await),
            Command::Stats { json } => self.stats(*json).await,
        }
    }

    /// Lists products, loading `args.pages` pages
    pub async fn products(&self, args: &ProductArgs) -> Result<String, AppError> {
        let descriptor = args.descriptor(self.settings.page_size);
        let mut feed = ProductFeed::new(self.cache.clone(), descriptor);

        if let Err(e) = feed.load(args.refresh).await {
            error!(error = %e, "product listing failed");
            return Err(AppError::LoadFailed);
        }
        for _ in 1..args.pages {
            if !feed.has_more() {
                break;
            }
            if let Err(e) = feed.load_more().await {
                error!(error = %e, "loading more products failed");
                return Err(AppError::LoadFailed);
            }
        }

        let mut out = String::new();
        if feed.items().is_empty() {
            out.push_str("No products found\n");
        }
        for product in feed.items() {
            let _ = writeln!(out, "{}", render_product_line(product));
        }
        if feed.has_more() {
            out.push_str("-- more available --\n");
        }
        Ok(out)
    }

    /// Shows one product
    pub async fn product(&self, id: &str) -> Result<String, AppError> {
        let product = self
            .cache
            .product(id)
            .await?
            .ok_or_else(|| AppError::ProductNotFound(id.to_string()))?;
        Ok(render_product_detail(&product))
    }

    /// Shows the public review feed; never fails
    pub async fn reviews(&self) -> String {
        let feed = ReviewFeedExecutor::new(self.source.clone()).execute().await;
        let environment = self.settings.environment;

        let mut out = String::new();
        if feed.items.is_empty() {
            out.push_str("No reviews to show\n");
        }
        for review in &feed.items {
            out.push_str(&render_review(review));
        }

        if environment.is_development() {
            if let Some(diagnostics) = &feed.diagnostics {
                let _ = writeln!(
                    out,
                    "[dev] level={:?} total={} both={} approved_only={} admin_only={} dated={} eligible={}",
                    feed.level,
                    diagnostics.total,
                    diagnostics.both_flags,
                    diagnostics.approved_only,
                    diagnostics.admin_only,
                    diagnostics.has_timestamp,
                    diagnostics.eligible
                );
            }
            if let Some(message) = feed.visible_diagnostic(environment) {
                let _ = writeln!(out, "[dev] error: {}", message);
            }
        }
        out
    }

    /// Shows dashboard statistics
    pub async fn stats(&self, json: bool) -> Result<String, AppError> {
        let stats = CatalogStats::collect(self.source.as_ref()).await?;
        if json {
            let mut out = serde_json::to_string_pretty(&stats)?;
            out.push('\n');
            return Ok(out);
        }

        let mut out = String::new();
        let p = &stats.products;
        let _ = writeln!(out, "Products:      {}", p.total);
        let _ = writeln!(out, "  bestsellers: {}", p.bestsellers);
        let _ = writeln!(out, "  hero:        {}", p.hero);
        let _ = writeln!(out, "  out of stock:{:>2}", p.out_of_stock);
        for (category, count) in &p.by_category {
            let name = if category.is_empty() { "(none)" } else { category };
            let _ = writeln!(out, "  {:<12} {}", name, count);
        }
        let r = &stats.reviews;
        let _ = writeln!(out, "Reviews:       {}", r.total);
        let _ = writeln!(out, "  approved:    {}", r.approved);
        let _ = writeln!(out, "  pending:     {}", r.pending);
        let _ = writeln!(out, "  admin added: {}", r.admin_added);
        match r.average_rating {
            Some(avg) => {
                let _ = writeln!(out, "  avg rating:  {:.1}", avg);
            }
            None => out.push_str("  avg rating:  -\n"),
        }
        Ok(out)
    }
}

fn render_product_line(product: &Product) -> String {
    let mut line = format!(
        "{:<20} {:<12} {}",
        product.id, product.category, product.name
    );
    if product.is_bestseller {
        line.push_str(" [bestseller]");
    }
    if product.out_of_stock {
        line.push_str(" [out of stock]");
    }
    line
}

fn render_product_detail(product: &Product) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", product.name);
    let _ = writeln!(out, "  id:        {}", product.id);
    let _ = writeln!(out, "  category:  {}", product.category);
    let _ = writeln!(
        out,
        "  status:    {}",
        if product.out_of_stock { "out of stock" } else { "in stock" }
    );
    if product.is_bestseller {
        out.push_str("  bestseller\n");
    }
    if let Some(created) = product.created_at {
        let _ = writeln!(out, "  added:     {}", created.format("%Y-%m-%d"));
    }
    if !product.description.is_empty() {
        let _ = writeln!(out, "\n{}\n", product.description);
    }
    for (i, image) in product.gallery().enumerate() {
        let label = if i == 0 { "main" } else { "image" };
        let _ = writeln!(out, "  {:<6} {}", label, image);
    }
    out
}

fn render_review(review: &Review) -> String {
    let stars: String = "*".repeat(review.rating as usize);
    let mut out = format!("{:<5} {}", stars, review.name);
    if !review.company.is_empty() {
        let _ = write!(out, ", {}", review.company);
    }
    if !review.location.is_empty() {
        let _ = write!(out, " ({})", review.location);
    }
    let _ = writeln!(out, "\n      {}", review.body);
    out
}
