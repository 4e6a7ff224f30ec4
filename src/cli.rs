//! Command-line interface parsing for the catalog client
//!
//! This module handles parsing of CLI arguments using clap and turns the
//! product listing flags into a `QueryDescriptor`.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use thiserror::Error;

use crate::catalog::QueryDescriptor;
use crate::config::Environment;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The specified environment name is not recognized
    #[error("Invalid environment: '{0}'. Valid environments: production, development")]
    InvalidEnvironment(String),
}

/// Export catalog - browse products and reviews from the storefront database
#[derive(Parser, Debug)]
#[command(name = "catalog")]
#[command(about = "Browse the export storefront's products, reviews and statistics")]
#[command(version)]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Read data from a JSON fixture instead of the hosted database
    ///
    /// The fixture holds one array per collection:
    ///   { "products": [ ... ], "reviews": [ ... ] }
    #[arg(long, global = true, value_name = "PATH")]
    pub fixture: Option<PathBuf>,

    /// Deployment environment (production, development)
    #[arg(long = "env", global = true, value_name = "ENV")]
    pub environment: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List products, newest first
    Products(ProductArgs),
    /// Show one product
    Product {
        /// Product id
        id: String,
    },
    /// Show the public review feed
    Reviews,
    /// Show dashboard statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Flags for the product listing
#[derive(Args, Debug, Clone, Default)]
pub struct ProductArgs {
    /// Only products in this category
    #[arg(long)]
    pub category: Option<String>,

    /// Only bestsellers
    #[arg(long)]
    pub bestsellers: bool,

    /// Products per page (defaults to the configured page size)
    #[arg(long, value_name = "N", conflicts_with = "no_limit")]
    pub limit: Option<usize>,

    /// Fetch without a page size cap
    #[arg(long)]
    pub no_limit: bool,

    /// Hide out-of-stock products
    #[arg(long)]
    pub in_stock: bool,

    /// Number of pages to load
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub pages: usize,

    /// Bypass the cache freshness check
    #[arg(long)]
    pub refresh: bool,
}

impl ProductArgs {
    /// Builds the query descriptor for these flags
    ///
    /// # Arguments
    /// * `page_size` - Limit used when neither `--limit` nor `--no-limit` is given
    pub fn descriptor(&self, page_size: usize) -> QueryDescriptor {
        let limit = if self.no_limit {
            None
        } else {
            Some(self.limit.unwrap_or(page_size))
        };

        QueryDescriptor {
            category: self
                .category
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            bestseller_only: self.bestsellers,
            limit,
            exclude_out_of_stock: self.in_stock,
        }
    }
}

/// Parses an environment string argument.
///
/// # Returns
/// * `Ok(Environment)` if the string names a known environment
/// * `Err(CliError::InvalidEnvironment)` otherwise
pub fn parse_environment_arg(s: &str) -> Result<Environment, CliError> {
    Environment::from_str(s).ok_or_else(|| CliError::InvalidEnvironment(s.to_string()))
}

/// Log filter directive for a `-v` count, used when `RUST_LOG` is unset
pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}
