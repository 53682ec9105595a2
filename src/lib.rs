//! Händler-Scout: postal-code driven retailer locator crawler
//!
//! This crate walks a list of German postal codes, drives one headless browser
//! page per code through the retailer search on bioladen.de, extracts the
//! listed retailers from the result page and keeps every listing at most once
//! per run.

pub mod browser;
pub mod config;
pub mod crawler;
pub mod dedup;
pub mod extract;
pub mod output;
pub mod postal;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for run-level failures
#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Browser error: {0}")]
    Browser(#[from] browser::BrowserError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("No postal codes found (check postal-codes.mode and its inputs)")]
    NoPostalCodes,
}

/// Result type alias for run-level operations
pub type Result<T> = std::result::Result<T, ScoutError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Country of every record this crawler produces
pub const COUNTRY: &str = "DE";

/// Site every record is sourced from
pub const SOURCE: &str = "bioladen.de";

// Re-export commonly used types
pub use config::Config;
pub use dedup::{DedupMode, DedupStore};
pub use extract::RetailerRecord;
pub use postal::PostalCode;
pub use state::CrawlState;
