//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! run statistics from the storage layer.

use crate::output::{OutputError, OutputResult};
use crate::state::CrawlState;
use crate::storage::{RunRecord, Storage};
use std::collections::HashMap;

/// Statistics of one stored run
#[derive(Debug, Clone)]
pub struct RunStatistics {
    pub run: RunRecord,

    /// Retailer rows stored for the run
    pub total_records: u64,

    /// Number of postal codes with a recorded outcome
    pub total_sessions: u64,

    /// Count of sessions by final state
    pub sessions_by_state: HashMap<CrawlState, u64>,

    /// Records kept over all sessions
    pub total_kept: u64,

    /// Records dropped as duplicates over all sessions
    pub total_dropped: u64,

    /// Postal codes whose session failed, with the recorded error
    pub failed_postal_codes: Vec<(String, Option<String>)>,
}

impl RunStatistics {
    /// Sessions that reached the extraction step
    pub fn extracted(&self) -> u64 {
        self.sessions_by_state
            .get(&CrawlState::Extracted)
            .copied()
            .unwrap_or(0)
    }

    /// Share of sessions that reached extraction, in percent
    pub fn success_rate(&self) -> f64 {
        if self.total_sessions == 0 {
            0.0
        } else {
            (self.extracted() as f64 / self.total_sessions as f64) * 100.0
        }
    }

    /// Run duration in seconds, once the run has finished
    pub fn duration_seconds(&self) -> Option<i64> {
        let started = self.run.started_at.parse::<chrono::DateTime<chrono::Utc>>();
        let finished = self
            .run
            .finished_at
            .as_deref()
            .map(|f| f.parse::<chrono::DateTime<chrono::Utc>>());
        match (started, finished) {
            (Ok(started), Some(Ok(finished))) => Some((finished - started).num_seconds()),
            _ => None,
        }
    }
}

/// Loads statistics of the most recent run
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(RunStatistics)` - Successfully loaded statistics
/// * `Err(OutputError::NoRuns)` - The database holds no run yet
pub fn load_statistics(storage: &dyn Storage) -> OutputResult<RunStatistics> {
    let run = storage.get_latest_run()?.ok_or(OutputError::NoRuns)?;
    load_run_statistics(storage, run)
}

/// Loads statistics of a given run
pub fn load_run_statistics(storage: &dyn Storage, run: RunRecord) -> OutputResult<RunStatistics> {
    let total_records = storage.count_records(run.id)?;
    let sessions_by_state = storage.count_sessions_by_state(run.id)?;
    let sessions = storage.load_sessions(run.id)?;

    let total_kept = sessions.iter().map(|s| s.kept).sum();
    let total_dropped = sessions.iter().map(|s| s.dropped).sum();
    let failed_postal_codes = sessions
        .iter()
        .filter(|s| s.final_state == CrawlState::Failed)
        .map(|s| (s.postal_code.clone(), s.error_message.clone()))
        .collect();

    Ok(RunStatistics {
        run,
        total_records,
        total_sessions: sessions.len() as u64,
        sessions_by_state,
        total_kept,
        total_dropped,
        failed_postal_codes,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &RunStatistics) {
    println!("=== Run {} Statistics ===\n", stats.run.id);

    println!("Overview:");
    println!("  Status: {}", stats.run.status.to_db_string());
    println!("  Started: {}", stats.run.started_at);
    if let Some(finished) = &stats.run.finished_at {
        println!("  Finished: {}", finished);
    }
    println!("  Postal codes processed: {}", stats.total_sessions);
    println!("  Retailers stored: {}", stats.total_records);
    println!("  Dropped as duplicates: {}", stats.total_dropped);
    println!();

    println!("Sessions by Final State:");
    for state in CrawlState::all_states() {
        let count = stats.sessions_by_state.get(&state).copied().unwrap_or(0);
        if count == 0 {
            continue;
        }
        let percentage = if stats.total_sessions > 0 {
            (count as f64 / stats.total_sessions as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", state, count, percentage);
    }
    println!();

    if !stats.failed_postal_codes.is_empty() {
        println!("Failed Postal Codes ({}):", stats.failed_postal_codes.len());
        for (code, error) in &stats.failed_postal_codes {
            match error {
                Some(error) => println!("  - {}: {}", code, error),
                None => println!("  - {}", code),
            }
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} postal codes extracted)",
        stats.success_rate(),
        stats.extracted(),
        stats.total_sessions
    );
}
