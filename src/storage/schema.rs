//! Database schema definitions and migrations
//!
//! This module contains all SQL schema definitions for the Händler-Scout database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- One row per kept retailer listing
CREATE TABLE IF NOT EXISTS retailers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    postal_code TEXT NOT NULL,
    name TEXT NOT NULL,
    street TEXT,
    zip TEXT,
    city TEXT,
    country TEXT NOT NULL,
    lat REAL,
    lng REAL,
    phone TEXT,
    email TEXT,
    website TEXT,
    opening_hours TEXT,
    detail_url TEXT,
    source TEXT NOT NULL,
    scraped_at TEXT NOT NULL,
    distance_km REAL,
    category TEXT
);

CREATE INDEX IF NOT EXISTS idx_retailers_run ON retailers(run_id);
CREATE INDEX IF NOT EXISTS idx_retailers_postal_code ON retailers(postal_code);

-- Outcome of every postal-code session
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    postal_code TEXT NOT NULL,
    final_state TEXT NOT NULL,
    kept INTEGER NOT NULL DEFAULT 0,
    dropped INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    finished_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_run ON sessions(run_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
