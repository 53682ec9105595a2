//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the run loop that coordinates all aspects of a crawl:
//! - Computing the postal-code work list once, up front
//! - Creating or resuming a run record
//! - Dispatching one session per postal code through a bounded pool
//! - Forwarding extracted records through deduplication into storage
//! - Capturing diagnostics and recording every session outcome

use crate::browser::PageFactory;
use crate::config::Config;
use crate::crawler::diagnostics::Diagnostics;
use crate::crawler::session::{CrawlSession, SessionFailure, SessionSettings};
use crate::dedup::{compute_key, DedupKey, DedupMode, DedupOutcome, DedupStore};
use crate::extract::RetailerRecord;
use crate::postal::{load_postal_codes, PostalCode};
use crate::state::CrawlState;
use crate::storage::{
    RunStatus, SessionRecord, SqliteStorage, Storage, StorageError, StorageResult,
};
use crate::ScoutError;
use chrono::Utc;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome of one postal-code session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub postal_code: PostalCode,
    pub state: CrawlState,
    /// Records extracted before deduplication
    pub found: usize,
    pub kept: usize,
    pub dropped: usize,
    pub error: Option<String>,
}

impl SessionReport {
    fn failed(postal_code: PostalCode, error: String) -> Self {
        Self {
            postal_code,
            state: CrawlState::Failed,
            found: 0,
            kept: 0,
            dropped: 0,
            error: Some(error),
        }
    }
}

/// Outcome of a whole run, sessions in postal-code order
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub run_id: i64,
    pub sessions: Vec<SessionReport>,
    /// Postal codes skipped because a resumed run already covered them
    pub skipped: usize,
}

impl RunReport {
    pub fn total_kept(&self) -> usize {
        self.sessions.iter().map(|s| s.kept).sum()
    }

    pub fn total_dropped(&self) -> usize {
        self.sessions.iter().map(|s| s.dropped).sum()
    }

    pub fn failed(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.state == CrawlState::Failed)
            .count()
    }
}

/// Everything a spawned session task shares with the coordinator
#[derive(Clone)]
struct TaskContext {
    run_id: i64,
    settings: Arc<SessionSettings>,
    pages: Arc<dyn PageFactory>,
    dedup: Arc<DedupStore>,
    mode: DedupMode,
    storage: Arc<Mutex<SqliteStorage>>,
    diagnostics: Arc<Diagnostics>,
    handler_timeout: Duration,
}

impl TaskContext {
    fn with_storage<T>(
        &self,
        f: impl FnOnce(&mut SqliteStorage) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut storage = self
            .storage
            .lock()
            .map_err(|_| StorageError::Database("storage lock poisoned".to_string()))?;
        f(&mut storage)
    }

    /// Opens a page, runs the session and hands its records on
    async fn process(&self, code: PostalCode) -> SessionReport {
        tracing::info!(">> {}: opening page", code);

        let page = match self.pages.new_page().await {
            Ok(page) => page,
            Err(e) => {
                let failure = SessionFailure::PageUnavailable(e);
                tracing::error!("{}: {}", code, failure);
                let report = SessionReport::failed(code, failure.to_string());
                self.record(&report);
                return report;
            }
        };

        let mut session = CrawlSession::new(page, code.clone(), (*self.settings).clone());
        let outcome = match tokio::time::timeout(self.handler_timeout, session.run()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                session.abort();
                Err(SessionFailure::HandlerTimeout(self.handler_timeout))
            }
        };

        let report = match outcome {
            Ok(records) => {
                if records.is_empty() {
                    tracing::info!("{}: no records extracted, capturing diagnostics", code);
                    self.diagnostics.capture_empty(session.page(), &code).await;
                }
                self.keep_new(&code, session.state(), records)
            }
            Err(failure) => {
                if failure.is_fill_failure() {
                    self.diagnostics
                        .capture_fill_error(session.page(), &code)
                        .await;
                }
                tracing::error!("{}: session failed: {}", code, failure);
                SessionReport::failed(code.clone(), failure.to_string())
            }
        };

        self.diagnostics
            .capture_api_response(session.page(), &code)
            .await;
        session.close().await;
        self.record(&report);
        report
    }

    /// Deduplicates and stores the records of a finished session
    fn keep_new(
        &self,
        code: &PostalCode,
        state: CrawlState,
        records: Vec<RetailerRecord>,
    ) -> SessionReport {
        let found = records.len();
        let DedupOutcome {
            kept,
            kept_count,
            dropped_count,
        } = self.dedup.filter(records, self.mode);

        let stored = self.with_storage(|s| s.insert_records(self.run_id, code.as_str(), &kept));
        let error = match stored {
            Ok(_) => None,
            Err(e) => {
                tracing::error!("{}: failed to store {} records: {}", code, kept_count, e);
                Some(e.to_string())
            }
        };

        tracing::info!(
            "<< {}: saved={}, dedup_dropped={}",
            code,
            kept_count,
            dropped_count
        );

        SessionReport {
            postal_code: code.clone(),
            state,
            found,
            kept: kept_count,
            dropped: dropped_count,
            error,
        }
    }

    fn record(&self, report: &SessionReport) {
        let session = SessionRecord {
            postal_code: report.postal_code.to_string(),
            final_state: report.state,
            kept: report.kept as u64,
            dropped: report.dropped as u64,
            error_message: report.error.clone(),
            finished_at: Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.with_storage(|s| s.record_session(self.run_id, &session)) {
            tracing::error!("{}: failed to record session outcome: {}", report.postal_code, e);
        }
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    storage: Arc<Mutex<SqliteStorage>>,
    pages: Arc<dyn PageFactory>,
    dedup: Arc<DedupStore>,
    pending: Vec<PostalCode>,
    skipped: usize,
    run_id: i64,
}

impl Coordinator {
    /// Creates a coordinator writing to the configured database
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `config_hash` - Hash stored on a newly created run
    /// * `pages` - Source of browser pages, one per session
    /// * `fresh` - Whether to start a new run even if one was interrupted
    pub fn new(
        config: Config,
        config_hash: &str,
        pages: Arc<dyn PageFactory>,
        fresh: bool,
    ) -> Result<Self, ScoutError> {
        let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
        Self::with_storage(config, config_hash, storage, pages, fresh)
    }

    /// Creates a coordinator on top of an already opened storage
    ///
    /// The postal-code list is computed here, before any session exists; an
    /// empty list fails with [`crate::ConfigError::NoPostalCodes`].
    pub fn with_storage(
        config: Config,
        config_hash: &str,
        mut storage: SqliteStorage,
        pages: Arc<dyn PageFactory>,
        fresh: bool,
    ) -> Result<Self, ScoutError> {
        let postal_codes = load_postal_codes(&config.postal_codes)?;
        let total = postal_codes.len();
        let mode = DedupMode::from(config.crawler.deduplicate_by);
        let dedup = Arc::new(DedupStore::new());

        // Create or resume run
        let resumable = if fresh {
            None
        } else {
            storage
                .get_latest_run()?
                .filter(|run| matches!(run.status, RunStatus::Running))
        };

        let (run_id, pending) = match resumable {
            Some(run) => {
                tracing::info!("Resuming interrupted run {}", run.id);
                if run.config_hash != config_hash {
                    tracing::warn!("Configuration changed since run {} started", run.id);
                }

                let finished = storage.finished_postal_codes(run.id)?;
                let keys = storage
                    .load_records(run.id)?
                    .iter()
                    .filter_map(|record| match compute_key(record, mode) {
                        DedupKey::Present(key) => Some(key),
                        DedupKey::Absent => None,
                    })
                    .collect::<Vec<_>>();
                dedup.seed(keys);
                tracing::info!(
                    "Skipping {} finished postal codes, {} known retailers",
                    finished.len(),
                    dedup.len()
                );

                let pending = postal_codes
                    .into_iter()
                    .filter(|code| !finished.contains(code.as_str()))
                    .collect();
                (run.id, pending)
            }
            None => {
                tracing::info!("Starting new run");
                (storage.create_run(config_hash)?, postal_codes)
            }
        };

        let skipped = total - pending.len();

        Ok(Self {
            config: Arc::new(config),
            storage: Arc::new(Mutex::new(storage)),
            pages,
            dedup,
            pending,
            skipped,
            run_id,
        })
    }

    /// Runs every pending postal code and completes the run
    ///
    /// Session failures never end the run; they are recorded and reported.
    pub async fn run(self) -> Result<RunReport, ScoutError> {
        let max_concurrency = self.config.crawler.max_concurrency.max(1) as usize;
        tracing::info!(
            "Starting run {}: {} postal codes, radius {} km, concurrency {}",
            self.run_id,
            self.pending.len(),
            self.config.crawler.radius_km,
            max_concurrency
        );

        let context = TaskContext {
            run_id: self.run_id,
            settings: Arc::new(SessionSettings::from_config(&self.config)),
            pages: Arc::clone(&self.pages),
            dedup: Arc::clone(&self.dedup),
            mode: DedupMode::from(self.config.crawler.deduplicate_by),
            storage: Arc::clone(&self.storage),
            diagnostics: Arc::new(Diagnostics::new(&self.config.output.diagnostics_dir)),
            handler_timeout: Duration::from_secs(self.config.browser.request_handler_timeout_secs),
        };

        let start_time = std::time::Instant::now();
        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let mut tasks = JoinSet::new();

        for (index, code) in self.pending.iter().cloned().enumerate() {
            // Acquire before spawning so sessions start in list order
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let context = context.clone();
            tasks.spawn(async move {
                let report = context.process(code).await;
                drop(permit);
                (index, report)
            });
        }

        let mut sessions = Vec::with_capacity(self.pending.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => sessions.push(entry),
                Err(e) => tracing::error!("Session task aborted: {}", e),
            }
        }
        sessions.sort_by_key(|(index, _)| *index);

        let report = RunReport {
            run_id: self.run_id,
            sessions: sessions.into_iter().map(|(_, report)| report).collect(),
            skipped: self.skipped,
        };

        // Mark run as completed
        context.with_storage(|s| s.complete_run(self.run_id))?;

        tracing::info!(
            "Run {} completed in {:?}: {} sessions, {} saved, {} dropped as duplicates, {} failed",
            self.run_id,
            start_time.elapsed(),
            report.sessions.len(),
            report.total_kept(),
            report.total_dropped(),
            report.failed()
        );

        Ok(report)
    }
}
