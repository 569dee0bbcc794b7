//! Fetch workers: job queue in, parsed records out

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::fetch::{FetchOutcome, Registry};
use crate::models::Identifier;
use crate::parser::{parse_validated, DocumentParser};
use crate::queue::{Message, WorkQueue};
use crate::stats::Stats;

/// One consumer of the job queue
///
/// Every item ends in exactly one of `scraped` or `failed`. A failure of any
/// kind only affects the job at hand, including a panic in the registry or
/// parser: the job is counted as failed and the worker keeps its marker slot.
pub struct FetchWorker<F, P: DocumentParser> {
    id: usize,
    registry: Arc<F>,
    parser: Arc<P>,
    jobs: WorkQueue<Identifier>,
    writes: WorkQueue<P::Record>,
    stats: Arc<Stats>,
}

impl<F, P> FetchWorker<F, P>
where
    F: Registry,
    P: DocumentParser,
{
    pub fn new(
        id: usize,
        registry: Arc<F>,
        parser: Arc<P>,
        jobs: WorkQueue<Identifier>,
        writes: WorkQueue<P::Record>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            id,
            registry,
            parser,
            jobs,
            writes,
            stats,
        }
    }

    /// Process jobs until a shutdown marker arrives
    pub async fn run(self) {
        loop {
            let (message, ack) = match self.jobs.get().await {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!(worker = self.id, error = %e, "Job queue unavailable, worker exiting");
                    return;
                }
            };

            match message {
                Message::Item(id) => {
                    if AssertUnwindSafe(self.process(&id))
                        .catch_unwind()
                        .await
                        .is_err()
                    {
                        error!(worker = self.id, usdot = %id, "Job panicked, counting as failed");
                        self.stats.record_failed();
                        self.stats.record_error();
                    }
                    ack.done();
                }
                Message::Shutdown => {
                    ack.done();
                    debug!(worker = self.id, "Fetch worker stopped");
                    return;
                }
            }
        }
    }

    async fn process(&self, id: &Identifier) {
        let document = match self.registry.fetch(id).await {
            FetchOutcome::Success(body) => body,
            FetchOutcome::NotFound => {
                debug!(worker = self.id, usdot = %id, "Carrier not found");
                self.stats.record_failed();
                return;
            }
            FetchOutcome::Failure(failure) => {
                debug!(worker = self.id, usdot = %id, %failure, "Fetch failed");
                self.stats.record_failed();
                return;
            }
        };

        let record = match parse_validated(self.parser.as_ref(), &document) {
            Ok(record) => record,
            Err(e) => {
                warn!(worker = self.id, usdot = %id, error = %e, "Discarding document");
                self.stats.record_failed();
                return;
            }
        };

        match self.writes.put(Message::Item(record)).await {
            Ok(()) => self.stats.record_scraped(),
            Err(e) => {
                error!(worker = self.id, usdot = %id, error = %e, "Could not hand record to writer");
                self.stats.record_failed();
                self.stats.record_error();
            }
        }
    }
}
