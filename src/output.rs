//! Output types: what one ingestion run hands back to the caller.

use crate::error::PageError;
use crate::transaction::{CanonicalRow, FlagSummary, RawRow};
use serde::{Deserialize, Serialize};

/// Result of the LLM extraction for a single page.
///
/// Failure is represented in-band: when `error` is set the page simply
/// contributed no rows, and the run carries on without it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageExtraction {
    /// 1-indexed page number in the source document.
    pub page_num: usize,
    /// Raw issuer-shaped rows, in the order the model emitted them.
    pub rows: Vec<RawRow>,
    /// Number of retries consumed by this page.
    pub retries: u8,
    /// Wall-clock time spent on this page, including retries and backoff.
    pub duration_ms: u64,
    /// Set when the page failed; `rows` is empty in that case.
    pub error: Option<PageError>,
}

/// Aggregate counters for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    /// Page count of the source document.
    pub total_pages: usize,
    /// Pages whose extraction succeeded.
    pub processed_pages: usize,
    /// Pages whose extraction failed after retries.
    pub failed_pages: usize,
    /// Pages skipped because they contained no text.
    pub empty_pages: usize,
    /// Raw rows emitted by the model across all pages.
    pub extracted_rows: usize,
    /// Rows that survived normalization.
    pub admitted_rows: usize,
    /// Rows carrying at least one reconciliation flag.
    pub flagged_rows: usize,
    /// Total wall-clock duration of the run.
    pub total_duration_ms: u64,
    /// Wall-clock duration of the LLM fan-out stage.
    pub llm_duration_ms: u64,
}

/// The ingestion response.
///
/// Field names are camelCase on the wire; `transactions` is a short preview
/// while `fullTransactions` carries the complete reconciled ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutput {
    /// Human-readable summary of the run.
    pub message: String,
    /// Preview of the first few reconciled rows.
    pub transactions: Vec<CanonicalRow>,
    /// The complete reconciled ledger.
    pub full_transactions: Vec<CanonicalRow>,
    pub total_transactions: usize,
    /// Opaque handle for the CSV artifact.
    pub download_id: String,
    /// Persisted run id; `None` when persistence failed (the artifact is
    /// still usable).
    pub run_id: Option<String>,
    /// Issuer tag from classification, when one was determined.
    pub issuer: Option<String>,
    /// Flag summary for rows with any flag set.
    pub flags: Vec<FlagSummary>,
    /// Per-page failures, for diagnostics.
    pub page_errors: Vec<PageError>,
    pub stats: IngestStats,
}
