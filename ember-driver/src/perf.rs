// SPDX-FileCopyrightText: 2025 ember contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Process-wide pipeline counters.
//!
//! Every queue/flush/cache/wait path bumps one atomic; the sampling side
//! takes a snapshot and zeros the whole record in one pass. Hot paths pay a
//! single relaxed add.

use std::sync::atomic::{AtomicU64, Ordering};

/// Mutable counter record, shared via `Arc` between the engine thread and the
/// present worker.
#[derive(Debug, Default)]
pub struct PerfCounters {
    queued_columns: AtomicU64,
    queued_spans: AtomicU64,
    flushes: AtomicU64,
    mid_frame_flushes: AtomicU64,
    max_batch: AtomicU64,
    atlas_bytes: AtomicU64,
    cmd_bytes: AtomicU64,
    cache_lookups: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_failed_inserts: AtomicU64,
    cache_wraps: AtomicU64,
    cache_entries: AtomicU64,
    pl_wait_ns: AtomicU64,
    scale_ns: AtomicU64,
}

/// One sampling window's worth of counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfSnapshot {
    pub queued_columns: u64,
    pub queued_spans: u64,
    pub flushes: u64,
    pub mid_frame_flushes: u64,
    pub max_batch: u64,
    pub atlas_bytes: u64,
    pub cmd_bytes: u64,
    pub cache_lookups: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_failed_inserts: u64,
    pub cache_wraps: u64,
    pub cache_entries: u64,
    pub pl_wait_ns: u64,
    pub scale_ns: u64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queued_column(&self) {
        self.queued_columns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queued_span(&self) {
        self.queued_spans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush(&self, cmd_bytes: u64, batch_len: u64) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.cmd_bytes.fetch_add(cmd_bytes, Ordering::Relaxed);
        self.max_batch.fetch_max(batch_len, Ordering::Relaxed);
    }

    pub fn mid_frame_flush(&self) {
        self.mid_frame_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn atlas_upload(&self, bytes: u64) {
        self.atlas_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn cache_lookup(&self, hit: bool) {
        self.cache_lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn cache_failed_insert(&self) {
        self.cache_failed_inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_wrap(&self) {
        self.cache_wraps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_cache_entries(&self, entries: u64) {
        self.cache_entries.store(entries, Ordering::Relaxed);
    }

    pub fn pl_wait(&self, ns: u64) {
        self.pl_wait_ns.fetch_add(ns, Ordering::Relaxed);
    }

    pub fn scale(&self, ns: u64) {
        self.scale_ns.fetch_add(ns, Ordering::Relaxed);
    }

    /// Return the accumulated window and atomically zero every counter.
    pub fn sample_and_reset(&self) -> PerfSnapshot {
        PerfSnapshot {
            queued_columns: self.queued_columns.swap(0, Ordering::Relaxed),
            queued_spans: self.queued_spans.swap(0, Ordering::Relaxed),
            flushes: self.flushes.swap(0, Ordering::Relaxed),
            mid_frame_flushes: self.mid_frame_flushes.swap(0, Ordering::Relaxed),
            max_batch: self.max_batch.swap(0, Ordering::Relaxed),
            atlas_bytes: self.atlas_bytes.swap(0, Ordering::Relaxed),
            cmd_bytes: self.cmd_bytes.swap(0, Ordering::Relaxed),
            cache_lookups: self.cache_lookups.swap(0, Ordering::Relaxed),
            cache_hits: self.cache_hits.swap(0, Ordering::Relaxed),
            cache_misses: self.cache_misses.swap(0, Ordering::Relaxed),
            cache_failed_inserts: self.cache_failed_inserts.swap(0, Ordering::Relaxed),
            cache_wraps: self.cache_wraps.swap(0, Ordering::Relaxed),
            cache_entries: self.cache_entries.swap(0, Ordering::Relaxed),
            pl_wait_ns: self.pl_wait_ns.swap(0, Ordering::Relaxed),
            scale_ns: self.scale_ns.swap(0, Ordering::Relaxed),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_returns_accumulated() {
        let perf = PerfCounters::new();
        perf.queued_column();
        perf.queued_column();
        perf.queued_span();
        perf.flush(64, 3);
        perf.cache_lookup(true);
        perf.cache_lookup(false);

        let snap = perf.sample_and_reset();
        assert_eq!(snap.queued_columns, 2);
        assert_eq!(snap.queued_spans, 1);
        assert_eq!(snap.flushes, 1);
        assert_eq!(snap.cmd_bytes, 64);
        assert_eq!(snap.max_batch, 3);
        assert_eq!(snap.cache_lookups, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
    }

    #[test]
    fn test_back_to_back_samples_zero() {
        let perf = PerfCounters::new();
        perf.queued_column();
        perf.pl_wait(100);
        perf.scale(200);

        let _ = perf.sample_and_reset();
        let second = perf.sample_and_reset();
        assert_eq!(second, PerfSnapshot::default());
    }

    #[test]
    fn test_max_batch_keeps_peak() {
        let perf = PerfCounters::new();
        perf.flush(0, 10);
        perf.flush(0, 500);
        perf.flush(0, 40);
        assert_eq!(perf.sample_and_reset().max_batch, 500);
    }
}
