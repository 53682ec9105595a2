//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::extract::RetailerRecord;
use crate::state::CrawlState;
use crate::storage::{RunRecord, SessionRecord};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines every database operation the crawler and the output
/// commands need.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new crawl run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Marks a run as completed with a finish timestamp
    fn complete_run(&mut self, run_id: i64) -> StorageResult<()>;

    // ===== Retailer Records =====

    /// Appends kept records found for one postal code
    ///
    /// All rows are written in one transaction.
    ///
    /// # Returns
    ///
    /// The number of rows written
    fn insert_records(
        &mut self,
        run_id: i64,
        postal_code: &str,
        records: &[RetailerRecord],
    ) -> StorageResult<usize>;

    /// Loads the stored records of a run in insertion order
    fn load_records(&self, run_id: i64) -> StorageResult<Vec<RetailerRecord>>;

    /// Counts the stored records of a run
    fn count_records(&self, run_id: i64) -> StorageResult<u64>;

    // ===== Session Outcomes =====

    /// Records how a postal-code session ended
    fn record_session(&mut self, run_id: i64, session: &SessionRecord) -> StorageResult<()>;

    /// Loads all session outcomes of a run in insertion order
    fn load_sessions(&self, run_id: i64) -> StorageResult<Vec<SessionRecord>>;

    /// Postal codes that already have a recorded outcome in a run
    fn finished_postal_codes(&self, run_id: i64) -> StorageResult<HashSet<String>>;

    /// Counts session outcomes of a run by final state
    fn count_sessions_by_state(&self, run_id: i64) -> StorageResult<HashMap<CrawlState, u64>>;
}
