//! Periodic progress reporting

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::models::Identifier;
use crate::queue::WorkQueue;
use crate::stats::Stats;

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({per_sec}, {eta}) {msg}";

/// Logs stats and queue depths every interval until cancelled
///
/// Only reads shared state, so cancelling it mid-sleep is always safe.
pub struct ProgressMonitor<R> {
    stats: Arc<Stats>,
    jobs: WorkQueue<Identifier>,
    writes: WorkQueue<R>,
    interval: Duration,
    mode: &'static str,
    bar: ProgressBar,
}

impl<R: Send + 'static> ProgressMonitor<R> {
    pub fn new(
        stats: Arc<Stats>,
        jobs: WorkQueue<Identifier>,
        writes: WorkQueue<R>,
        interval: Duration,
        total: u64,
        show_progress_bar: bool,
        test_mode: bool,
    ) -> Self {
        Self {
            stats,
            jobs,
            writes,
            interval,
            mode: if test_mode { "test" } else { "production" },
            bar: progress_bar(total, show_progress_bar),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => self.report(),
            }
        }

        self.update_bar();
        self.bar.finish_and_clear();
    }

    fn report(&self) {
        let snapshot = self.stats.snapshot();
        self.update_bar();

        info!(
            mode = self.mode,
            scraped = snapshot.scraped,
            failed = snapshot.failed,
            saved = snapshot.saved,
            errors = snapshot.errors,
            job_queue = self.jobs.len(),
            write_queue = self.writes.len(),
            "Progress"
        );
    }

    fn update_bar(&self) {
        let snapshot = self.stats.snapshot();
        self.bar.set_position(snapshot.processed());
        self.bar
            .set_message(format!("saved {} / failed {}", snapshot.saved, snapshot.failed));
    }
}

fn progress_bar(total: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_template_is_valid() {
        assert!(ProgressStyle::default_bar().template(BAR_TEMPLATE).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_when_cancelled() {
        let stats = Arc::new(Stats::new());
        let jobs = WorkQueue::bounded(1).unwrap();
        let writes: WorkQueue<()> = WorkQueue::bounded(1).unwrap();
        let monitor = ProgressMonitor::new(
            Arc::clone(&stats),
            jobs,
            writes,
            Duration::from_secs(10),
            5,
            false,
            true,
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor.run(cancel.clone()));

        stats.record_scraped();
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
        assert_eq!(stats.snapshot().scraped, 1);
    }
}
