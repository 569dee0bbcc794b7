//! Durable record storage
//!
//! The pipeline talks to storage through [`RecordStore`]: one call to learn
//! which identifiers are already persisted, and one transactional bulk
//! upsert per batch. [`PgCarrierStore`] is the Postgres implementation.

mod postgres;

pub use postgres::PgCarrierStore;

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Identifier, ParsedRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{context}: {source}")]
    Query {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Attach a description of the failed statement to a sqlx error
pub(crate) trait QueryContext<T> {
    fn context(self, context: &'static str) -> Result<T, StoreError>;
}

impl<T> QueryContext<T> for Result<T, sqlx::Error> {
    fn context(self, context: &'static str) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::Query { context, source })
    }
}

/// Storage collaborator of the harvesting pipeline
#[async_trait]
pub trait RecordStore: Send {
    type Record: ParsedRecord + Send + Sync + 'static;

    /// Identifiers already persisted
    async fn existing_identifiers(&mut self) -> Result<HashSet<Identifier>, StoreError>;

    /// Upsert a batch atomically and return the number of entities written
    ///
    /// Child collections are replaced, not merged. On error nothing from the
    /// batch is persisted.
    async fn bulk_upsert(&mut self, batch: &[Self::Record]) -> Result<u64, StoreError>;

    /// Release the underlying connection
    async fn close(self) -> Result<(), StoreError>
    where
        Self: Sized,
    {
        Ok(())
    }
}
