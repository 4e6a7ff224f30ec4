//! Application settings
//!
//! Settings are layered: built-in defaults, then an optional JSON file
//! (`~/.config/export-catalog/config.json` on Linux, or `--config`), then
//! `CATALOG_*` environment variables. CLI flags are applied last by `main`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::DEFAULT_TTL_MINUTES;
use crate::data::firestore::DEFAULT_DATABASE;

/// Default number of products per page
pub const DEFAULT_PAGE_SIZE: usize = 12;

/// Largest cache TTL a `chrono::Duration` can hold, in seconds
pub const MAX_CACHE_TTL_SECS: u64 = (i64::MAX / 1000) as u64;

/// Errors that can occur while loading settings
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The config file is not valid JSON for `Settings`
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// An environment variable holds an unusable value
    #[error("Invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },

    /// A config file setting is out of range
    #[error("Invalid value '{value}' for {field} in {path}")]
    InvalidValue {
        path: PathBuf,
        field: &'static str,
        value: String,
    },

    /// The hosted database was selected but no project is configured
    #[error("No project id configured: set CATALOG_PROJECT_ID, add project_id to the config file, or pass --fixture")]
    MissingProjectId,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    /// Shows developer diagnostics
    Development,
}

impl Environment {
    /// Parses an environment name
    ///
    /// Matching is case-insensitive: "prod" | "production", "dev" | "development".
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Environment> {
        match s.to_lowercase().trim() {
            "prod" | "production" => Some(Environment::Production),
            "dev" | "development" => Some(Environment::Development),
            _ => None,
        }
    }

    pub fn is_development(&self) -> bool {
        *self == Environment::Development
    }
}

/// Runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Hosted database project
    pub project_id: Option<String>,
    /// Web API key for the REST endpoint
    pub api_key: Option<String>,
    /// Database name within the project
    pub database: String,
    /// Overrides the REST endpoint, e.g. for an emulator
    pub base_url: Option<String>,
    /// Product cache freshness window in seconds
    pub cache_ttl_secs: u64,
    /// Products per page when no limit is given
    pub page_size: usize,
    pub environment: Environment,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_id: None,
            api_key: None,
            database: DEFAULT_DATABASE.to_string(),
            base_url: None,
            cache_ttl_secs: (DEFAULT_TTL_MINUTES * 60) as u64,
            page_size: DEFAULT_PAGE_SIZE,
            environment: Environment::Production,
        }
    }
}

impl Settings {
    /// XDG-compliant location of the config file
    ///
    /// Returns `None` if no home directory can be determined.
    pub fn default_path() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "export-catalog")?;
        Some(project_dirs.config_dir().join("config.json"))
    }

    /// Reads settings from a JSON file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if settings.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ConfigError::InvalidValue {
                path: path.to_path_buf(),
                field: "cache_ttl_secs",
                value: settings.cache_ttl_secs.to_string(),
            });
        }
        Ok(settings)
    }

    /// Loads the layered settings
    ///
    /// # Arguments
    /// * `explicit` - A config file that must exist; when `None` the default
    ///   location is used if present
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        settings.apply_env(|var| std::env::var(var).ok())?;
        Ok(settings)
    }

    /// Applies `CATALOG_*` overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("CATALOG_PROJECT_ID") {
            self.project_id = Some(value);
        }
        if let Some(value) = lookup("CATALOG_API_KEY") {
            self.api_key = Some(value);
        }
        if let Some(value) = lookup("CATALOG_DATABASE") {
            self.database = value;
        }
        if let Some(value) = lookup("CATALOG_BASE_URL") {
            self.base_url = Some(value);
        }
        if let Some(value) = lookup("CATALOG_CACHE_TTL_SECS") {
            self.cache_ttl_secs = value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs <= MAX_CACHE_TTL_SECS)
                .ok_or_else(|| ConfigError::InvalidEnv {
                    var: "CATALOG_CACHE_TTL_SECS",
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup("CATALOG_PAGE_SIZE") {
            self.page_size = value
                .trim()
                .parse()
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| ConfigError::InvalidEnv {
                    var: "CATALOG_PAGE_SIZE",
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup("CATALOG_ENV") {
            self.environment =
                Environment::from_str(&value).ok_or_else(|| ConfigError::InvalidEnv {
                    var: "CATALOG_ENV",
                    value: value.clone(),
                })?;
        }
        Ok(())
    }

    /// Cache freshness window, capped at `MAX_CACHE_TTL_SECS`
    pub fn cache_ttl(&self) -> Duration {
        let secs = self.cache_ttl_secs.min(MAX_CACHE_TTL_SECS) as i64;
        Duration::try_seconds(secs).unwrap_or(Duration::MAX)
    }

    /// The configured project, required for the hosted database
    pub fn require_project_id(&self) -> Result<&str, ConfigError> {
        self.project_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConfigError::MissingProjectId)
    }
}
