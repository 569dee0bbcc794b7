//! Harvesting pipeline
//!
//! ```text
//! feeder -> job queue -> FetchWorker x N -> write queue -> BatchWriter -> store
//!                                                              ^
//!                                   ProgressMonitor (read-only)
//! ```
//!
//! Both queues are bounded, so a slow store throttles the workers, which in
//! turn throttle the feeder. Workers and the writer stop on shutdown
//! markers; the monitor stops on cancellation.
//!
//! Teardown in [`Pipeline::run`] is strictly ordered:
//!
//! 1. enqueue every job, then one marker per worker
//! 2. wait until the job queue is fully acknowledged
//! 3. wait for every worker task to exit
//! 4. enqueue one marker on the write queue
//! 5. wait until the write queue is acknowledged and the writer has done its
//!    terminal flush
//! 6. cancel the monitor and wait for it
//!
//! Step 4 must come after step 3: a worker still running could otherwise
//! hand the writer a record after its terminal flush.

mod monitor;
mod worker;
mod writer;

pub use monitor::ProgressMonitor;
pub use worker::FetchWorker;
pub use writer::{BatchWriter, WriterSummary};

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::fetch::Registry;
use crate::models::Identifier;
use crate::parser::DocumentParser;
use crate::queue::{Message, QueueError, WorkQueue};
use crate::stats::{Stats, StatsSnapshot};
use crate::storage::RecordStore;

/// Sizing and presentation of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Number of fetch workers
    pub workers: usize,
    /// Flush threshold of the batch writer
    pub batch_size: usize,
    pub job_queue_capacity: usize,
    pub write_queue_capacity: usize,
    /// Period of the progress monitor
    pub progress_interval: Duration,
    /// Draw a console progress bar (hidden anyway when not on a terminal)
    pub show_progress_bar: bool,
    pub test_mode: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 8,
            batch_size: 1000,
            job_queue_capacity: 1000,
            write_queue_capacity: 1000,
            progress_interval: Duration::from_secs(10),
            show_progress_bar: false,
            test_mode: false,
        }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stats: StatsSnapshot,
    pub elapsed: Duration,
    /// The interrupt fired before every job was enqueued
    pub interrupted: bool,
    /// Todo entries never handed to a worker because of the interrupt
    pub not_enqueued: usize,
    pub writer: WriterSummary,
}

impl RunReport {
    /// Fetched items per second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.stats.processed() as f64 / secs
        } else {
            0.0
        }
    }
}

/// A configured pipeline, ready to run once
pub struct Pipeline<F, P, S> {
    settings: PipelineSettings,
    registry: Arc<F>,
    parser: Arc<P>,
    store: S,
    stats: Arc<Stats>,
    interrupt: CancellationToken,
}

impl<F, P, S> Pipeline<F, P, S>
where
    F: Registry + 'static,
    P: DocumentParser + 'static,
    S: RecordStore<Record = P::Record> + 'static,
{
    pub fn new(settings: PipelineSettings, registry: F, parser: P, store: S) -> Self {
        Self {
            settings,
            registry: Arc::new(registry),
            parser: Arc::new(parser),
            store,
            stats: Arc::new(Stats::new()),
            interrupt: CancellationToken::new(),
        }
    }

    /// Stop enqueuing new jobs once `token` is cancelled
    ///
    /// Jobs already enqueued still run to completion and their records are
    /// persisted.
    pub fn with_interrupt(mut self, token: CancellationToken) -> Self {
        self.interrupt = token;
        self
    }

    /// Live counters, shared with the running tasks
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Process `todo` and tear everything down in order
    pub async fn run(self, todo: Vec<Identifier>) -> Result<RunReport> {
        let Self {
            settings,
            registry,
            parser,
            store,
            stats,
            interrupt,
        } = self;

        ensure!(settings.workers > 0, "Pipeline needs at least one fetch worker");
        ensure!(settings.batch_size > 0, "Batch size must be greater than 0");

        let started = Instant::now();
        let total = todo.len();

        let jobs: WorkQueue<Identifier> =
            WorkQueue::bounded(settings.job_queue_capacity).context("Invalid job queue capacity")?;
        let writes: WorkQueue<P::Record> = WorkQueue::bounded(settings.write_queue_capacity)
            .context("Invalid write queue capacity")?;

        info!(
            todo = total,
            workers = settings.workers,
            batch_size = settings.batch_size,
            test_mode = settings.test_mode,
            "Starting pipeline"
        );

        let monitor_cancel = CancellationToken::new();
        let monitor = ProgressMonitor::new(
            Arc::clone(&stats),
            jobs.clone(),
            writes.clone(),
            settings.progress_interval,
            total as u64,
            settings.show_progress_bar,
            settings.test_mode,
        );
        let monitor_handle = tokio::spawn(monitor.run(monitor_cancel.clone()));

        let writer = BatchWriter::new(store, writes.clone(), settings.batch_size, Arc::clone(&stats));
        let writer_handle = tokio::spawn(writer.run());

        let worker_handles: Vec<_> = (0..settings.workers)
            .map(|id| {
                let worker = FetchWorker::new(
                    id,
                    Arc::clone(&registry),
                    Arc::clone(&parser),
                    jobs.clone(),
                    writes.clone(),
                    Arc::clone(&stats),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        // 1. Jobs, then one marker per worker
        let enqueued = feed(&jobs, todo, &interrupt)
            .await
            .context("Failed to enqueue jobs")?;
        for _ in 0..settings.workers {
            jobs.put(Message::Shutdown)
                .await
                .context("Failed to enqueue worker shutdown")?;
        }

        // 2. Every job and marker acknowledged
        jobs.join().await.context("Job queue closed while draining")?;

        // 3. Every worker exited
        for (id, result) in join_all(worker_handles).await.into_iter().enumerate() {
            if let Err(e) = result {
                error!(worker = id, error = %e, "Fetch worker task failed");
            }
        }

        // 4. Only now can nothing else reach the writer
        writes
            .put(Message::Shutdown)
            .await
            .context("Failed to enqueue writer shutdown")?;

        // 5. Write queue drained and terminal flush done
        writes.join().await.context("Write queue closed while draining")?;
        let writer_summary = writer_handle.await.context("Batch writer task failed")?;

        // 6. Monitor last
        monitor_cancel.cancel();
        if let Err(e) = monitor_handle.await {
            warn!(error = %e, "Progress monitor task failed");
        }

        let report = RunReport {
            stats: stats.snapshot(),
            elapsed: started.elapsed(),
            interrupted: enqueued < total,
            not_enqueued: total - enqueued,
            writer: writer_summary,
        };

        info!(
            stats = %report.stats,
            elapsed_secs = report.elapsed.as_secs_f64(),
            interrupted = report.interrupted,
            "Pipeline finished"
        );

        Ok(report)
    }
}

/// Enqueue jobs until the todo list or the interrupt runs out
///
/// Returns how many jobs were enqueued.
async fn feed(
    jobs: &WorkQueue<Identifier>,
    todo: Vec<Identifier>,
    interrupt: &CancellationToken,
) -> Result<usize, QueueError> {
    let total = todo.len();
    let mut enqueued = 0;

    for id in todo {
        tokio::select! {
            biased;

            _ = interrupt.cancelled() => {
                warn!(
                    enqueued,
                    skipped = total - enqueued,
                    "Interrupted, draining jobs already enqueued"
                );
                break;
            }
            result = jobs.put(Message::Item(id)) => {
                result?;
                enqueued += 1;
            }
        }
    }

    Ok(enqueued)
}
