//! SAFER Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Harvests carrier snapshots from the FMCSA SAFER registry for a large
//! catalog of USDOT numbers and persists them to PostgreSQL.
//!
//! # Pipeline
//!
//! ```text
//! catalog -> job queue -> fetch worker x N -> write queue -> batch writer -> postgres
//! ```
//!
//! - [`catalog`]: loads identifiers and diffs them against persisted keys
//! - [`queue`]: bounded, acknowledged work queues with shutdown markers
//! - [`fetch`]: registry client with retry and proxy identity rotation
//! - [`parser`]: document to [`models::CarrierRecord`] extraction
//! - [`storage`]: transactional bulk upserts
//! - [`pipeline`]: workers, writer, progress monitor and ordered shutdown
//!
//! # Example
//!
//! ```no_run
//! use safer_ingest::{
//!     config::IngestConfig, fetch::RegistryClient, parser::CarrierSnapshotParser,
//!     pipeline::Pipeline, storage::PgCarrierStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let store = PgCarrierStore::connect(&config.database_url).await?;
//!     let registry = RegistryClient::new(config.fetch_settings(), config.active_proxy())?;
//!     let pipeline = Pipeline::new(
//!         config.pipeline_settings(),
//!         registry,
//!         CarrierSnapshotParser::new(),
//!         store,
//!     );
//!     let report = pipeline.run(vec!["1234567".into()]).await?;
//!     tracing::info!(stats = %report.stats, "done");
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod fetch;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod stats;
pub mod storage;

pub use models::{CarrierRecord, Identifier, ParsedRecord};
pub use stats::{Stats, StatsSnapshot};
