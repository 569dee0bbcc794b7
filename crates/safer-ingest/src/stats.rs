//! Run-wide counters shared by workers, the writer and the monitor

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide pipeline counters
///
/// Increments are lock-free so hundreds of workers can record outcomes
/// concurrently. Only the totals are meaningful; readers take a
/// [`StatsSnapshot`].
#[derive(Debug, Default)]
pub struct Stats {
    scraped: AtomicU64,
    failed: AtomicU64,
    saved: AtomicU64,
    errors: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record was fetched, parsed and handed to the writer
    pub fn record_scraped(&self) {
        self.scraped.fetch_add(1, Ordering::Relaxed);
    }

    /// A job ended without a record (not found, fetch or parse failure)
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// `count` records were committed by one flush
    pub fn record_saved(&self, count: u64) {
        self.saved.fetch_add(count, Ordering::Relaxed);
    }

    /// An unexpected failure, e.g. a dropped batch
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            scraped: self.scraped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            saved: self.saved.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub scraped: u64,
    pub failed: u64,
    pub saved: u64,
    pub errors: u64,
}

impl StatsSnapshot {
    /// Jobs that reached a final outcome at the worker stage
    pub fn processed(&self) -> u64 {
        self.scraped + self.failed
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scraped={} failed={} saved={} errors={}",
            self.scraped, self.failed, self.saved, self.errors
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        assert_eq!(Stats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_saved_adds_batch_counts() {
        let stats = Stats::new();
        stats.record_saved(1000);
        stats.record_saved(7);
        assert_eq!(stats.snapshot().saved, 1007);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let stats = Arc::new(Stats::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let stats = stats.clone();
                tokio::spawn(async move {
                    for _ in 0..1000 {
                        stats.record_scraped();
                        stats.record_failed();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.scraped, 16_000);
        assert_eq!(snapshot.failed, 16_000);
        assert_eq!(snapshot.processed(), 32_000);
    }

    #[test]
    fn test_display_lists_all_counters() {
        let snapshot = StatsSnapshot {
            scraped: 2,
            failed: 1,
            saved: 2,
            errors: 0,
        };
        assert_eq!(snapshot.to_string(), "scraped=2 failed=1 saved=2 errors=0");
    }
}
