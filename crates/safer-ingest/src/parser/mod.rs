//! Document parsing boundary
//!
//! A [`DocumentParser`] turns one fetched document into a structured record.
//! Parsers are pure and stateless per call; retries belong to the fetch
//! client, so a parse failure is final for that job.

mod carrier;

pub use carrier::CarrierSnapshotParser;

use thiserror::Error;

use crate::models::ParsedRecord;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty document")]
    EmptyDocument,

    #[error("document carries no identifier")]
    MissingIdentifier,
}

/// Raw document to structured record
pub trait DocumentParser: Send + Sync {
    type Record: ParsedRecord + Send + Sync + 'static;

    fn parse(&self, document: &str) -> Result<Self::Record, ParseError>;
}

/// Parse and reject records without a non-empty identifier
pub fn parse_validated<P>(parser: &P, document: &str) -> Result<P::Record, ParseError>
where
    P: DocumentParser + ?Sized,
{
    let record = parser.parse(document)?;
    if record.identifier().is_none() {
        return Err(ParseError::MissingIdentifier);
    }
    Ok(record)
}
