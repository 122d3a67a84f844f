//! Process-wide counters for the entry engine

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Metrics handle shared by the write pipeline, reads and the admin API
#[derive(Debug, Default)]
pub struct Metrics {
    entries_added: AtomicU64,
    add_failures: AtomicU64,
    adds_rejected: AtomicU64,
    entries_read: AtomicU64,
    read_misses: AtomicU64,
    ledgers_fenced: AtomicU64,
    dirs_failed: AtomicU64,
    journal_batches: AtomicU64,
    callback_panics: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_added(&self) {
        self.entries_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_failed(&self) {
        self.add_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "add_failures", "Metric incremented");
    }

    pub fn add_rejected(&self) {
        self.adds_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "adds_rejected", "Metric incremented");
    }

    pub fn entry_read(&self) {
        self.entries_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_missed(&self) {
        self.read_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ledger_fenced(&self) {
        self.ledgers_fenced.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "ledgers_fenced", "Metric incremented");
    }

    pub fn dir_failed(&self) {
        self.dirs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "dirs_failed", "Metric incremented");
    }

    pub fn journal_batch(&self) {
        self.journal_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_panicked(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "callback_panics", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entries_added: self.entries_added.load(Ordering::Relaxed),
            add_failures: self.add_failures.load(Ordering::Relaxed),
            adds_rejected: self.adds_rejected.load(Ordering::Relaxed),
            entries_read: self.entries_read.load(Ordering::Relaxed),
            read_misses: self.read_misses.load(Ordering::Relaxed),
            ledgers_fenced: self.ledgers_fenced.load(Ordering::Relaxed),
            dirs_failed: self.dirs_failed.load(Ordering::Relaxed),
            journal_batches: self.journal_batches.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub entries_added: u64,
    pub add_failures: u64,
    pub adds_rejected: u64,
    pub entries_read: u64,
    pub read_misses: u64,
    pub ledgers_fenced: u64,
    pub dirs_failed: u64,
    pub journal_batches: u64,
    pub callback_panics: u64,
}
