//! Process-lifetime counters for the notification pipeline.
//!
//! All methods take `&self`; counters are atomics and the per-reason map sits
//! behind a short-lived mutex. Persisting statistics is left to the host.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shared counters. Wrap in an `Arc` and hand clones to each component.
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    passed: AtomicU64,
    spoken: AtomicU64,
    dropped: AtomicU64,
    silenced: AtomicU64,
    speech_errors: AtomicU64,
    rebinds_requested: AtomicU64,
    rebinds_skipped: AtomicU64,
    rebinds_recovered: AtomicU64,
    filtered: Mutex<BTreeMap<String, u64>>,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub passed: u64,
    pub spoken: u64,
    pub dropped: u64,
    pub silenced: u64,
    pub speech_errors: u64,
    pub rebinds_requested: u64,
    pub rebinds_skipped: u64,
    pub rebinds_recovered: u64,
    /// Blocked events keyed by reason category (the text before the first `:`).
    pub filtered: BTreeMap<String, u64>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passed(&self) {
        self.passed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a blocked event under the category of `reason`.
    pub fn record_filtered(&self, reason: &str) {
        let category = reason_category(reason).to_owned();
        let mut map = self.filtered.lock().unwrap_or_else(PoisonError::into_inner);
        *map.entry(category).or_insert(0) += 1;
    }

    pub fn record_spoken(&self) {
        self.spoken.fetch_add(1, Ordering::Relaxed);
    }

    /// An item that passed the filters but was dropped by the scheduler.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// An item silenced by media coexistence.
    pub fn record_silenced(&self) {
        self.silenced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_speech_error(&self) {
        self.speech_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rebind_requested(&self) {
        self.rebinds_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rebind_skipped(&self) {
        self.rebinds_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rebind_recovered(&self) {
        self.rebinds_recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
            spoken: self.spoken.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            silenced: self.silenced.load(Ordering::Relaxed),
            speech_errors: self.speech_errors.load(Ordering::Relaxed),
            rebinds_requested: self.rebinds_requested.load(Ordering::Relaxed),
            rebinds_skipped: self.rebinds_skipped.load(Ordering::Relaxed),
            rebinds_recovered: self.rebinds_recovered.load(Ordering::Relaxed),
            filtered: self
                .filtered
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

fn reason_category(reason: &str) -> &str {
    reason
        .split_once(':')
        .map_or(reason, |(head, _)| head)
        .trim()
}
