use lexguard_oracle::OracleError;
use thiserror::Error;

/// Document Ingestor failure, passed through unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    /// The source format cannot be turned into plain text.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),
    /// The source could not be decoded.
    #[error("corrupt document: {0}")]
    Corrupt(String),
}

/// Clause extraction failure. Fatal for the run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// Non-blank text produced no clauses.
    #[error("no clauses extracted from {chunks} non-empty chunk(s)")]
    EmptyResult {
        /// Chunks submitted to the oracle.
        chunks: usize,
    },
    /// A chunk's extraction call failed after retries.
    #[error("clause extraction failed on chunk {chunk}: {source}")]
    Oracle {
        /// Zero-based chunk index.
        chunk: usize,
        /// Underlying oracle failure.
        #[source]
        source: OracleError,
    },
}

/// On-demand explanation failure; never affects other entities.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("explanation unavailable for `{entity_id}`: {reason}")]
pub struct ExplanationUnavailable {
    /// Finding or remediation item id.
    pub entity_id: String,
    /// What went wrong.
    pub reason: String,
}

/// Fatal outcome of a pipeline run; no partial report accompanies it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// The document could not be ingested.
    #[error(transparent)]
    Ingest(#[from] IngestError),
    /// Clause extraction failed.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// The caller cancelled the run.
    #[error("analysis cancelled")]
    Cancelled,
}
