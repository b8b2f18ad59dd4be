//! Pipeline counters for the consumer loop.
//!
//! Updated only from the consumer thread but kept atomic so `main` (and tests) can read a
//! snapshot through a shared `Arc` while the loop is running.
//! A one-line summary is logged when the loop reaches `STOPPED`.

use std::sync::atomic::{AtomicU64, Ordering};

use log::info;

use crate::acquisition::channel::ChannelStatsSnapshot;

#[derive(Debug, Default)]
pub struct PipelineStats {
    persisted: AtomicU64,
    failed_status: AtomicU64,
    unknown_code: AtomicU64,
    coercion_errors: AtomicU64,
    sink_errors: AtomicU64,
    drained: AtomicU64,
}

/// Point-in-time copy of `PipelineStats`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub persisted: u64,
    pub failed_status: u64,
    pub unknown_code: u64,
    pub coercion_errors: u64,
    pub sink_errors: u64,
    pub drained: u64,
}

impl StatsSnapshot {
    /// Events that reached the consumer but produced no record.
    pub fn dropped(&self) -> u64 {
        self.failed_status + self.unknown_code + self.coercion_errors + self.sink_errors
    }
}

impl PipelineStats {
    #[inline]
    pub fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failed_status(&self) {
        self.failed_status.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_code(&self) {
        self.unknown_code.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_coercion_error(&self) {
        self.coercion_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sink_error(&self) {
        self.sink_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_drained(&self, n: u64) {
        self.drained.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            persisted: self.persisted.load(Ordering::Relaxed),
            failed_status: self.failed_status.load(Ordering::Relaxed),
            unknown_code: self.unknown_code.load(Ordering::Relaxed),
            coercion_errors: self.coercion_errors.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
        }
    }
}

/// Logs the end-of-run summary.
pub fn log_summary(stats: &StatsSnapshot, channel: &ChannelStatsSnapshot) {
    info!(
        "[Summary] persisted={} dropped={} (failed_status={} unknown_code={} coercion={} sink={}) drained_at_shutdown={}",
        stats.persisted,
        stats.dropped(),
        stats.failed_status,
        stats.unknown_code,
        stats.coercion_errors,
        stats.sink_errors,
        stats.drained
    );
    info!(
        "[Summary] channel published={} displaced={} rejected={}",
        channel.published, channel.displaced, channel.rejected
    );
}
