//! Error types for the pdf2ledger library.
//!
//! Failures in this pipeline come in three severities, and only the first
//! is an `Err` at the top level:
//!
//! * [`IngestError`] ends the run. Everything in it describes a situation
//!   where no amount of continuing would produce a ledger: the bytes are
//!   not a PDF, the document has no text, the default prompt slot is empty,
//!   or reconciliation finished with zero rows. Store and artifact lookups
//!   (`RunNotFound`, `ArtifactNotFound`) live here too because they answer
//!   a direct request with nothing.
//!
//! * [`PageError`] costs one page and nothing else. A statement page whose
//!   LLM call times out, errors, or answers with something that isn't a row
//!   array simply contributes no rows; the error travels inside that page's
//!   [`crate::output::PageExtraction`] and surfaces in the run's
//!   diagnostics. The run only dies if *every* page ends up this way —
//!   and then as [`IngestError::NoTransactionsExtracted`], not as a page
//!   error promoted to fatal.
//!
//! * Suspicious rows are not errors at all. A balance that doesn't add up
//!   or a row missing its structure is exactly what the user needs to see
//!   in the output, so those conditions are flags on
//!   [`crate::transaction::CanonicalRow`] and never abort anything.

use thiserror::Error;

/// A condition that ends an ingestion run, or answers a store/artifact
/// request with nothing.
///
/// Anything recoverable at page granularity belongs in [`PageError`]
/// instead.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Source errors ─────────────────────────────────────────────────────
    /// The uploaded bytes are not a parseable PDF.
    #[error("Source document is not a parseable PDF: {detail}")]
    MalformedSource { detail: String },

    /// The upload exceeds the configured size cap.
    #[error("Source document is {size} bytes, exceeding the {max}-byte limit")]
    SourceTooLarge { size: u64, max: u64 },

    /// The PDF parsed but no page produced any text.
    #[error("No text could be extracted from any page of the document")]
    NoTextExtracted,

    // ── Prompt errors ─────────────────────────────────────────────────────
    /// Neither an issuer-specific nor a default extraction prompt is active.
    #[error("No extraction prompt configured: the default prompt slot is empty")]
    NoPromptConfigured,

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// Every page either failed or produced rows that did not survive
    /// normalization and reconciliation.
    #[error("No transactions could be extracted from the document")]
    NoTransactionsExtracted,

    /// The whole-pipeline deadline elapsed before all pages completed.
    #[error("Pipeline timed out after {secs}s")]
    PipelineTimeout { secs: u64 },

    // ── Store errors ──────────────────────────────────────────────────────
    /// A run id was presented that the store does not know.
    #[error("Run '{id}' not found")]
    RunNotFound { id: String },

    /// A download artifact id was presented that does not resolve to a file.
    #[error("Artifact '{id}' not found or unreadable")]
    ArtifactNotFound { id: String },

    /// Underlying persistence failure (SQLite, serialization).
    #[error("Store error: {0}")]
    Store(String),

    // ── Config / infrastructure ───────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for IngestError {
    fn from(e: rusqlite::Error) -> Self {
        IngestError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        IngestError::Store(format!("serialization: {e}"))
    }
}

/// What went wrong with one page's extraction.
///
/// Carried inside that page's [`crate::output::PageExtraction`]; the rest
/// of the run is unaffected.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// LLM call failed after retries.
    #[error("Page {page}: LLM call failed after {retries} retries: {detail}")]
    LlmFailed { page: usize, retries: u8, detail: String },

    /// LLM call exceeded the per-call deadline.
    #[error("Page {page}: LLM call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The response was not valid JSON even after fence stripping.
    #[error("Page {page}: LLM response is not parseable JSON: {detail}")]
    Unparseable { page: usize, detail: String },

    /// The response parsed but is neither an array nor a `transactions` object.
    #[error("Page {page}: LLM response has an unexpected shape: {detail}")]
    ShapeInvalid { page: usize, detail: String },
}
