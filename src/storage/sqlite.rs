//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::extract::RetailerRecord;
use crate::state::CrawlState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus, SessionRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::path::Path;

const RETAILER_COLUMNS: &str = "name, street, zip, city, country, lat, lng, phone, email, \
     website, opening_hours, detail_url, source, scraped_at, distance_km, category";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for concurrent readers while a run appends
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Running),
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<RetailerRecord> {
    let scraped_at: String = row.get(13)?;
    let scraped_at = DateTime::parse_from_rfc3339(&scraped_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(13, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(RetailerRecord {
        name: row.get(0)?,
        street: row.get(1)?,
        zip: row.get(2)?,
        city: row.get(3)?,
        country: row.get(4)?,
        lat: row.get(5)?,
        lng: row.get(6)?,
        phone: row.get(7)?,
        email: row.get(8)?,
        website: row.get(9)?,
        opening_hours: row.get(10)?,
        detail_url: row.get(11)?,
        source: row.get(12)?,
        scraped_at,
        distance_km: row.get(14)?,
        category: row.get(15)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn complete_run(&mut self, run_id: i64) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![RunStatus::Completed.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Retailer Records =====

    fn insert_records(
        &mut self,
        run_id: i64,
        postal_code: &str,
        records: &[RetailerRecord],
    ) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO retailers (run_id, postal_code, {RETAILER_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
            ))?;

            for record in records {
                stmt.execute(params![
                    run_id,
                    postal_code,
                    record.name,
                    record.street,
                    record.zip,
                    record.city,
                    record.country,
                    record.lat,
                    record.lng,
                    record.phone,
                    record.email,
                    record.website,
                    record.opening_hours,
                    record.detail_url,
                    record.source,
                    record.scraped_at.to_rfc3339(),
                    record.distance_km,
                    record.category,
                ])?;
            }
        }
        tx.commit()?;

        Ok(records.len())
    }

    fn load_records(&self, run_id: i64) -> StorageResult<Vec<RetailerRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RETAILER_COLUMNS} FROM retailers WHERE run_id = ?1 ORDER BY id"
        ))?;

        let records = stmt
            .query_map(params![run_id], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn count_records(&self, run_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM retailers WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Session Outcomes =====

    fn record_session(&mut self, run_id: i64, session: &SessionRecord) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO sessions (run_id, postal_code, final_state, kept, dropped, error_message, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                session.postal_code,
                session.final_state.to_db_string(),
                session.kept as i64,
                session.dropped as i64,
                session.error_message,
                session.finished_at,
            ],
        )?;
        Ok(())
    }

    fn load_sessions(&self, run_id: i64) -> StorageResult<Vec<SessionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT postal_code, final_state, kept, dropped, error_message, finished_at
             FROM sessions WHERE run_id = ?1 ORDER BY id",
        )?;

        let sessions = stmt
            .query_map(params![run_id], |row| {
                Ok(SessionRecord {
                    postal_code: row.get(0)?,
                    final_state: CrawlState::from_db_string(&row.get::<_, String>(1)?)
                        .unwrap_or(CrawlState::Failed),
                    kept: row.get::<_, i64>(2)? as u64,
                    dropped: row.get::<_, i64>(3)? as u64,
                    error_message: row.get(4)?,
                    finished_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    fn finished_postal_codes(&self, run_id: i64) -> StorageResult<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT postal_code FROM sessions WHERE run_id = ?1")?;

        let codes = stmt
            .query_map(params![run_id], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(codes)
    }

    fn count_sessions_by_state(&self, run_id: i64) -> StorageResult<HashMap<CrawlState, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT final_state, COUNT(*) FROM sessions WHERE run_id = ?1 GROUP BY final_state",
        )?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (state_str, count) = row?;
            match CrawlState::from_db_string(&state_str) {
                Some(state) => {
                    counts.insert(state, count as u64);
                }
                None => {
                    return Err(StorageError::Serialization(format!(
                        "Unknown session state: {}",
                        state_str
                    )))
                }
            }
        }

        Ok(counts)
    }
}
