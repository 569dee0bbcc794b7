//! Error types for SAFER ingestion

use thiserror::Error;

/// Result type alias for SAFER operations
pub type Result<T> = std::result::Result<T, SaferError>;

/// Main error type shared across the workspace
#[derive(Error, Debug)]
pub enum SaferError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Column '{column}' not found in {path} (available: {available})")]
    MissingColumn {
        column: String,
        path: String,
        available: String,
    },
}
