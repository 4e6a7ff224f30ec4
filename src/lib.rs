//! Export Catalog Library
//!
//! Product listing, caching and review feed logic for the export storefront,
//! exposed for the `catalog` binary and integration tests.

pub mod app;
pub mod cache;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod data;
pub mod reviews;
pub mod stats;
