//! The single consumer of the write queue

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::queue::{Message, WorkQueue};
use crate::stats::Stats;
use crate::storage::RecordStore;

/// What the writer did over its lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterSummary {
    /// Size of every attempted flush, in order
    pub flushes: Vec<usize>,
    /// Flushes whose transaction failed and whose records were dropped
    pub failed_batches: usize,
    pub saved: u64,
}

/// Accumulates records and upserts them in batches
///
/// A batch is flushed when it reaches the threshold, or as soon as the write
/// queue is momentarily empty, and once more on shutdown if anything is
/// left. A failed flush drops that batch and the writer carries on.
pub struct BatchWriter<S: RecordStore> {
    store: S,
    writes: WorkQueue<S::Record>,
    batch_size: usize,
    batch: Vec<S::Record>,
    stats: Arc<Stats>,
    summary: WriterSummary,
}

impl<S: RecordStore> BatchWriter<S> {
    pub fn new(store: S, writes: WorkQueue<S::Record>, batch_size: usize, stats: Arc<Stats>) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            writes,
            batch_size,
            batch: Vec::with_capacity(batch_size),
            stats,
            summary: WriterSummary::default(),
        }
    }

    /// Drain the write queue until the shutdown marker, then close the store
    pub async fn run(mut self) -> WriterSummary {
        loop {
            let (message, ack) = match self.writes.get().await {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!(error = %e, "Write queue unavailable, writer exiting");
                    break;
                }
            };

            match message {
                Message::Item(record) => {
                    self.batch.push(record);
                    if self.batch.len() >= self.batch_size || self.writes.is_empty() {
                        self.flush().await;
                    }
                    ack.done();
                }
                Message::Shutdown => {
                    if !self.batch.is_empty() {
                        self.flush().await;
                    }
                    ack.done();
                    break;
                }
            }
        }

        if !self.batch.is_empty() {
            warn!(records = self.batch.len(), "Writer exiting with unflushed records");
        }

        let Self { store, summary, .. } = self;
        if let Err(e) = store.close().await {
            warn!(error = %e, "Failed to close store connection");
        }

        info!(
            flushes = summary.flushes.len(),
            failed_batches = summary.failed_batches,
            saved = summary.saved,
            "Batch writer finished"
        );
        summary
    }

    async fn flush(&mut self) {
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        let size = batch.len();
        self.summary.flushes.push(size);

        match self.store.bulk_upsert(&batch).await {
            Ok(saved) => {
                self.stats.record_saved(saved);
                self.summary.saved += saved;
                debug!(size, saved, "Flushed batch");
            }
            Err(e) => {
                self.stats.record_error();
                self.summary.failed_batches += 1;
                error!(size, error = %e, "Batch upsert failed, dropping batch");
            }
        }
    }
}
