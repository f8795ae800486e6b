//! Error taxonomy shared by the extractors and coordinators.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while turning source bytes into a structured document.
///
/// Extraction never panics on malformed input; the error is returned to the
/// coordinator, which aborts the ingestion of that file.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("CSV extraction failed: {0}")]
    Csv(String),

    #[error("zip entry {name} exceeds size limit ({limit} bytes)")]
    EntryTooLarge { name: String, limit: u64 },

    #[error("sheet {sheet} spans more than {limit} cells")]
    SheetTooLarge { sheet: String, limit: usize },
}

impl From<zip::result::ZipError> for ExtractError {
    fn from(e: zip::result::ZipError) -> Self {
        ExtractError::Ooxml(e.to_string())
    }
}

impl From<quick_xml::Error> for ExtractError {
    fn from(e: quick_xml::Error) -> Self {
        ExtractError::Ooxml(e.to_string())
    }
}

impl From<csv::Error> for ExtractError {
    fn from(e: csv::Error) -> Self {
        ExtractError::Csv(e.to_string())
    }
}

/// Errors surfaced by the ingestion and reconciliation coordinators.
#[derive(Debug, Error)]
pub enum ReconError {
    /// A storage, index, or analysis call failed. Passed through untouched;
    /// nothing in the core retries.
    #[error(transparent)]
    Service(#[from] anyhow::Error),

    /// The knowledge-base rebuild reached a terminal failure status.
    #[error("knowledge base build failed with status {status}: {payload}")]
    BuildFailed {
        status: String,
        payload: serde_json::Value,
    },

    /// A wait exceeded its wall-clock budget.
    #[error("timed out waiting for {operation} after {elapsed:?} ({attempts} polls)")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
        attempts: u32,
    },

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReconError {
    /// Short machine-readable code, used by the HTTP front-end.
    pub fn code(&self) -> &'static str {
        match self {
            ReconError::Service(_) => "upstream",
            ReconError::BuildFailed { .. } => "build_failed",
            ReconError::Timeout { .. } => "timeout",
            ReconError::Extract(_) | ReconError::InvalidInput(_) => "bad_request",
            ReconError::Io(_) | ReconError::Json(_) => "internal",
        }
    }
}
