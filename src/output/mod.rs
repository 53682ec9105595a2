//! Output module for reporting on stored runs
//!
//! This module handles:
//! - Loading and printing run statistics
//! - Exporting stored retailer records as JSON lines
//! - Generating markdown run summaries

pub mod json;
mod markdown;
pub mod stats;

pub use json::export_json_lines;
pub use markdown::{format_markdown_summary, generate_markdown_summary};
pub use stats::{load_run_statistics, load_statistics, print_statistics, RunStatistics};

use crate::storage::StorageError;
use thiserror::Error;

/// Errors that can occur while producing output
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("No crawl runs found in database")]
    NoRuns,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
