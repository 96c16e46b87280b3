use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::outcome::ErrorKind;

/// Counters shared by every worker of a harvester.
#[derive(Debug, Default)]
pub struct Diagnostics {
    failures: Mutex<BTreeMap<ErrorKind, u64>>,
    requests: AtomicU64,
    cache_hits: AtomicU64,
    retries: AtomicU64,
    features_skipped: AtomicU64,
    duplicates_removed: AtomicU64,
    tiles_dropped: AtomicU64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, kind: ErrorKind) {
        let mut failures = self
            .failures
            .lock()
            .expect("diagnostics lock is not poisoned");
        *failures.entry(kind).or_insert(0) += 1;
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_features(&self, count: u64) {
        self.features_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_duplicates(&self, count: u64) {
        self.duplicates_removed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dropped_tile(&self) {
        self.tiles_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failures(&self, kind: ErrorKind) -> u64 {
        let failures = self
            .failures
            .lock()
            .expect("diagnostics lock is not poisoned");
        failures.get(&kind).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> DiagnosticsSummary {
        let failures = self
            .failures
            .lock()
            .expect("diagnostics lock is not poisoned")
            .clone();

        DiagnosticsSummary {
            failures,
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            features_skipped: self.features_skipped.load(Ordering::Relaxed),
            duplicates_removed: self.duplicates_removed.load(Ordering::Relaxed),
            tiles_dropped: self.tiles_dropped.load(Ordering::Relaxed),
        }
    }

    /// Difference between the current counters and an earlier snapshot.
    pub fn since(&self, earlier: &DiagnosticsSummary) -> DiagnosticsSummary {
        let now = self.snapshot();
        let failures = now
            .failures
            .iter()
            .filter_map(|(kind, count)| {
                let delta = count.saturating_sub(earlier.failures.get(kind).copied().unwrap_or(0));
                (delta > 0).then_some((*kind, delta))
            })
            .collect();

        DiagnosticsSummary {
            failures,
            requests: now.requests.saturating_sub(earlier.requests),
            cache_hits: now.cache_hits.saturating_sub(earlier.cache_hits),
            retries: now.retries.saturating_sub(earlier.retries),
            features_skipped: now.features_skipped.saturating_sub(earlier.features_skipped),
            duplicates_removed: now.duplicates_removed.saturating_sub(earlier.duplicates_removed),
            tiles_dropped: now.tiles_dropped.saturating_sub(earlier.tiles_dropped),
        }
    }
}

/// Serializable snapshot of [`Diagnostics`], reported alongside the features.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSummary {
    pub failures: BTreeMap<ErrorKind, u64>,
    pub requests: u64,
    pub cache_hits: u64,
    pub retries: u64,
    pub features_skipped: u64,
    pub duplicates_removed: u64,
    pub tiles_dropped: u64,
}

impl DiagnosticsSummary {
    pub fn failure_total(&self) -> u64 {
        self.failures.values().sum()
    }

    pub fn failures_of(&self, kind: ErrorKind) -> u64 {
        self.failures.get(&kind).copied().unwrap_or(0)
    }

    /// True when nothing went wrong: no failures, no dropped tiles, no
    /// retries and no skipped features.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
            && self.tiles_dropped == 0
            && self.retries == 0
            && self.features_skipped == 0
    }
}
