//! Shared test doubles for pipeline integration tests
//!
//! - [`ScriptedRegistry`]: answers lookups from a fixed table and counts calls
//! - [`UsdotParser`]: treats the document body as the USDOT number
//! - [`MemoryStore`]: in-memory [`RecordStore`] with optional failure injection
//! - [`Timeline`]: ordered log of fetch, flush and close events across doubles

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use safer_ingest::fetch::{FetchFailure, FetchOutcome, Registry};
use safer_ingest::parser::{DocumentParser, ParseError};
use safer_ingest::storage::{RecordStore, StoreError};
use safer_ingest::{CarrierRecord, Identifier, ParsedRecord};

/// Something a test double observed, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Fetched(Identifier),
    Flushed(Vec<Identifier>),
    Closed,
}

/// Event log shared by the registry and store doubles of one run
#[derive(Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<Event>>>);

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

/// Registry answering from a table; unknown identifiers succeed with their
/// own value as the document
#[derive(Default)]
pub struct ScriptedRegistry {
    answers: HashMap<String, FetchOutcome>,
    delay: Duration,
    slow: HashMap<String, Duration>,
    calls: Mutex<Vec<Identifier>>,
    timeline: Option<Timeline>,
}

impl ScriptedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, id: &str, outcome: FetchOutcome) -> Self {
        self.answers.insert(id.to_string(), outcome);
        self
    }

    pub fn not_found(self, id: &str) -> Self {
        self.answer(id, FetchOutcome::NotFound)
    }

    pub fn failing(self, id: &str) -> Self {
        self.answer(id, FetchOutcome::Failure(FetchFailure::ServerError(503)))
    }

    /// Simulated network latency per lookup
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Extra latency for a single identifier
    pub fn slow(mut self, id: &str, delay: Duration) -> Self {
        self.slow.insert(id.to_string(), delay);
        self
    }

    /// Record an [`Event::Fetched`] when each lookup returns
    pub fn with_timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = Some(timeline);
        self
    }

    pub fn calls(&self) -> Vec<Identifier> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Registry for ScriptedRegistry {
    async fn fetch(&self, id: &Identifier) -> FetchOutcome {
        self.calls.lock().unwrap().push(id.clone());
        let delay = self.slow.get(id.as_str()).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let outcome = self
            .answers
            .get(id.as_str())
            .cloned()
            .unwrap_or_else(|| FetchOutcome::Success(id.as_str().to_string()));
        if let Some(timeline) = &self.timeline {
            timeline.push(Event::Fetched(id.clone()));
        }
        outcome
    }
}

/// Shares the call log of a [`ScriptedRegistry`] the pipeline owns
pub struct SharedRegistry(pub Arc<ScriptedRegistry>);

#[async_trait]
impl Registry for SharedRegistry {
    async fn fetch(&self, id: &Identifier) -> FetchOutcome {
        self.0.fetch(id).await
    }
}

/// Parser that keys the record by the document body
pub struct UsdotParser;

impl DocumentParser for UsdotParser {
    type Record = CarrierRecord;

    fn parse(&self, document: &str) -> Result<CarrierRecord, ParseError> {
        if document.trim().is_empty() {
            return Err(ParseError::EmptyDocument);
        }
        let mut record = CarrierRecord::default();
        record.metadata.source = "test".to_string();
        record.metadata.usdot_number = Some(Identifier::new(document));
        Ok(record)
    }
}

/// Like [`UsdotParser`] but panics on one document
pub struct PanickingParser(pub &'static str);

impl DocumentParser for PanickingParser {
    type Record = CarrierRecord;

    fn parse(&self, document: &str) -> Result<CarrierRecord, ParseError> {
        if document == self.0 {
            panic!("unparseable markup in {document}");
        }
        UsdotParser.parse(document)
    }
}

/// What a [`MemoryStore`] has seen, shared with the test after the run
#[derive(Default)]
pub struct StoreLog {
    pub saved: Vec<Identifier>,
    pub flushes: Vec<usize>,
    pub closed: bool,
}

/// In-memory store; flush number `fail_on` (1-based) fails
#[derive(Clone, Default)]
pub struct MemoryStore {
    persisted: HashSet<Identifier>,
    fail_on: Option<usize>,
    log: Arc<Mutex<StoreLog>>,
    timeline: Option<Timeline>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persisted(ids: &[&str]) -> Self {
        Self {
            persisted: ids.iter().map(|id| Identifier::new(id)).collect(),
            ..Self::default()
        }
    }

    pub fn failing_flush(mut self, flush: usize) -> Self {
        self.fail_on = Some(flush);
        self
    }

    /// Record flush and close events
    pub fn with_timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = Some(timeline);
        self
    }

    pub fn log(&self) -> Arc<Mutex<StoreLog>> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    type Record = CarrierRecord;

    async fn existing_identifiers(&mut self) -> Result<HashSet<Identifier>, StoreError> {
        Ok(self.persisted.clone())
    }

    async fn bulk_upsert(&mut self, batch: &[CarrierRecord]) -> Result<u64, StoreError> {
        let mut log = self.log.lock().unwrap();
        log.flushes.push(batch.len());
        if let Some(timeline) = &self.timeline {
            let keys = batch.iter().filter_map(|r| r.identifier().cloned()).collect();
            timeline.push(Event::Flushed(keys));
        }
        if self.fail_on == Some(log.flushes.len()) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        log.saved
            .extend(batch.iter().filter_map(|record| record.identifier().cloned()));
        Ok(batch.len() as u64)
    }

    async fn close(self) -> Result<(), StoreError> {
        self.log.lock().unwrap().closed = true;
        if let Some(timeline) = &self.timeline {
            timeline.push(Event::Closed);
        }
        Ok(())
    }
}

pub fn ids(values: &[&str]) -> Vec<Identifier> {
    values.iter().map(|v| Identifier::new(v)).collect()
}
