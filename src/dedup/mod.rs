//! Run-wide retailer deduplication
//!
//! One [`DedupStore`] lives for the whole run and is shared by every session.
//! Its key set only ever grows; a record survives filtering when its key has
//! not been seen before in this run, or when it has no key at all.

use crate::config::DedupBy;
use crate::extract::RetailerRecord;
use std::collections::HashSet;
use std::sync::Mutex;

/// Which fields identify a retailer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    /// Normalized detail-page link
    DetailUrl,
    /// Name, street and postal code together
    Fields,
}

impl From<DedupBy> for DedupMode {
    fn from(by: DedupBy) -> Self {
        match by {
            DedupBy::DetailUrl => Self::DetailUrl,
            DedupBy::Fields => Self::Fields,
        }
    }
}

/// Identity of a record for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Nothing to compare on; such records never collide
    Absent,
    Present(String),
}

/// Derives the deduplication key of a record
pub fn compute_key(record: &RetailerRecord, mode: DedupMode) -> DedupKey {
    match mode {
        DedupMode::DetailUrl => {
            let url = record
                .detail_url
                .as_deref()
                .unwrap_or_default()
                .trim()
                .to_lowercase();
            if url.is_empty() {
                DedupKey::Absent
            } else {
                DedupKey::Present(url)
            }
        }
        DedupMode::Fields => {
            let lowered = |value: Option<&str>| value.unwrap_or_default().trim().to_lowercase();
            DedupKey::Present(format!(
                "{}|{}|{}",
                record.name.trim().to_lowercase(),
                lowered(record.street.as_deref()),
                record.zip.as_deref().unwrap_or_default().trim()
            ))
        }
    }
}

/// Result of filtering one batch
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub kept: Vec<RetailerRecord>,
    pub kept_count: usize,
    pub dropped_count: usize,
}

/// Key set shared by all sessions of a run
#[derive(Debug, Default)]
pub struct DedupStore {
    keys: Mutex<HashSet<String>>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds keys recorded by an earlier, interrupted part of the run
    pub fn seed<I>(&self, keys: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut set = self.lock();
        set.extend(keys);
    }

    /// Keeps every record whose key is absent or unseen, and remembers the
    /// new keys
    ///
    /// The whole batch is checked and inserted under one lock, so concurrent
    /// sessions can never both keep the same key.
    pub fn filter(&self, records: Vec<RetailerRecord>, mode: DedupMode) -> DedupOutcome {
        let mut set = self.lock();
        let mut outcome = DedupOutcome::default();

        for record in records {
            let keep = match compute_key(&record, mode) {
                DedupKey::Absent => true,
                DedupKey::Present(key) => set.insert(key),
            };
            if keep {
                outcome.kept.push(record);
                outcome.kept_count += 1;
            } else {
                outcome.dropped_count += 1;
            }
        }

        outcome
    }

    /// Number of distinct keys seen so far
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // A panic while holding the lock cannot leave the set half-updated
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
