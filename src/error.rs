// src/error.rs

use thiserror::Error;

/// Errors raised by the ingest pipeline.
///
/// `StructuralMismatch` and `EmptyExtraction` are the fatal conditions of the
/// core; the remaining variants come from the collaborators around it.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A filing-status window does not fit the flattened rows.
    #[error("structural mismatch for {status}: {detail}")]
    StructuralMismatch { status: String, detail: String },

    /// No heading in the document owned a non-empty table.
    #[error("no non-empty sections extracted; the source layout has probably changed")]
    EmptyExtraction,

    /// Column-wise concatenation of frames with different row counts.
    #[error("cannot align frames: expected {expected} rows, found {found}")]
    RowCountMismatch { expected: usize, found: usize },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A history store read or write failed.
    #[error("history store failure on `{key}`: {source}")]
    Store {
        key: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;
