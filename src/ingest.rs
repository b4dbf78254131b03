//! The per-upload orchestrator: one call turns statement bytes into a
//! reconciled, persisted, downloadable ledger.
//!
//! ## Shape of a run
//!
//! ```text
//! bytes
//!  │
//!  ├─ 1. Gate      size cap, %PDF magic
//!  ├─ 2. Split     per-page text (spawn_blocking)
//!  ├─ 3. Classify  advisory issuer tag (LLM, best-effort)
//!  ├─ 4. Prompt    resolve issuer → default slot, expand per page
//!  ├─ 5. Fan-out   bounded concurrent LLM extraction per non-empty page
//!  ├─ 6. Merge     sort by page index (document order)
//!  ├─ 7. Normalize issuer-shaped rows → canonical rows
//!  ├─ 8. Reconcile running-balance validation + type-flip repair
//!  ├─ 9. Artifact  CSV written before persistence, so a store outage
//!  │               never costs the user their download
//!  └─ 10. Persist  run record; failure degrades to run_id = None
//! ```
//!
//! ## Cancellation
//!
//! The whole run lives inside the returned future: dropping it aborts
//! in-flight LLM calls, prevents new dispatches, and skips persistence.
//! A configurable whole-pipeline deadline bounds the fan-out stage; no
//! scratch files exist to clean up because splitting works from the
//! in-memory buffer.

use crate::artifact::ArtifactStore;
use crate::config::IngestConfig;
use crate::diff::DiffAnalysis;
use crate::error::{IngestError, PageError};
use crate::llm::TextCompletion;
use crate::output::{IngestOutput, IngestStats, PageExtraction};
use crate::pipeline::{classify, extract, normalize, reconcile, split};
use crate::prompts;
use crate::store::{PromptStore, RunStore};
use crate::transaction::{summarize_flags, RawRow};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Owns the collaborators of the ingestion pipeline and runs uploads
/// through it.
///
/// All dependencies are injected: there are no process-wide singletons, and
/// a test can swap any seam (LLM, prompt store, run store) independently.
pub struct Ingestor {
    provider: Arc<dyn TextCompletion>,
    prompts: Arc<dyn PromptStore>,
    runs: Arc<dyn RunStore>,
    artifacts: ArtifactStore,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        provider: Arc<dyn TextCompletion>,
        prompts: Arc<dyn PromptStore>,
        runs: Arc<dyn RunStore>,
        artifacts: ArtifactStore,
        config: IngestConfig,
    ) -> Self {
        Self {
            provider,
            prompts,
            runs,
            artifacts,
            config,
        }
    }

    /// Ingest a statement PDF from memory.
    ///
    /// # Errors
    /// Fatal conditions only — malformed source, no text, no prompt, no
    /// transactions, pipeline timeout. Per-page failures and row-level
    /// findings are reported inside the output, never as `Err`.
    pub async fn ingest(
        &self,
        bytes: &[u8],
        source_name: &str,
    ) -> Result<IngestOutput, IngestError> {
        let total_start = Instant::now();
        info!("Starting ingestion: {source_name}");

        // ── Step 1: Gate ─────────────────────────────────────────────────
        if bytes.len() as u64 > self.config.max_upload_bytes {
            return Err(IngestError::SourceTooLarge {
                size: bytes.len() as u64,
                max: self.config.max_upload_bytes,
            });
        }

        // ── Step 2: Split ────────────────────────────────────────────────
        let pages = split::split_pages(bytes).await?;
        if pages.is_empty() || !split::has_any_text(&pages) {
            return Err(IngestError::NoTextExtracted);
        }
        let total_pages = pages.len();
        info!("Statement has {total_pages} pages");

        // ── Step 3: Classify (best-effort) ───────────────────────────────
        let issuer = match &self.config.issuer_override {
            Some(tag) => Some(tag.clone()),
            None => {
                classify::classify_issuer(&self.provider, &pages[0], self.config.api_timeout_secs)
                    .await
            }
        };
        info!(issuer = issuer.as_deref().unwrap_or("-"), "issuer classification");

        // ── Step 4: Resolve prompt (cached for the run) ──────────────────
        let prompt = self.prompts.resolve_prompt(issuer.as_deref()).await?;

        // ── Step 5: Fan out extraction over non-empty pages ──────────────
        let work: Vec<(usize, String)> = pages
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(idx, text)| (idx + 1, prompts::expand(&prompt.text, text)))
            .collect();
        let empty_pages = total_pages - work.len();
        let pool = work.len().min(self.config.concurrency).max(1);
        debug!("extracting {} pages with a pool of {pool}", work.len());

        let llm_start = Instant::now();
        let fan_out = stream::iter(work.into_iter().map(|(page_num, expanded)| {
            let provider = Arc::clone(&self.provider);
            let config = self.config.clone();
            async move { extract::extract_page(&provider, page_num, &expanded, &config).await }
        }))
        .buffer_unordered(pool)
        .collect::<Vec<PageExtraction>>();

        let mut extractions = timeout(
            Duration::from_secs(self.config.pipeline_timeout_secs),
            fan_out,
        )
        .await
        .map_err(|_| IngestError::PipelineTimeout {
            secs: self.config.pipeline_timeout_secs,
        })?;
        let llm_duration_ms = llm_start.elapsed().as_millis() as u64;

        // ── Step 6: Merge in document order ──────────────────────────────
        extractions.sort_by_key(|e| e.page_num);
        let page_errors: Vec<PageError> = extractions
            .iter()
            .filter_map(|e| e.error.clone())
            .collect();
        for err in &page_errors {
            warn!("page skipped: {err}");
        }
        let processed_pages = extractions.iter().filter(|e| e.error.is_none()).count();
        let raw_rows: Vec<RawRow> = extractions
            .into_iter()
            .filter(|e| e.error.is_none())
            .flat_map(|e| e.rows)
            .collect();
        let extracted_rows = raw_rows.len();

        // ── Step 7: Normalize ────────────────────────────────────────────
        let canonical = normalize::normalize_rows(raw_rows);
        let admitted_rows = canonical.len();

        // ── Step 8: Reconcile ────────────────────────────────────────────
        let rows = reconcile::reconcile(canonical, self.config.balance_tolerance);
        if rows.is_empty() {
            return Err(IngestError::NoTransactionsExtracted);
        }
        let flags = summarize_flags(&rows);

        // ── Step 9: Artifact before persistence ──────────────────────────
        let download_id = self.artifacts.write_rows(&rows)?;

        // ── Step 10: Persist (degrades, never aborts) ────────────────────
        let run_id = match self
            .runs
            .create_run(
                source_name,
                &rows,
                &flags,
                self.provider.model_tag(),
                &prompt.id,
            )
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("run persistence failed, continuing without run id: {e}");
                None
            }
        };

        // ── Step 11: Respond ─────────────────────────────────────────────
        let stats = IngestStats {
            total_pages,
            processed_pages,
            failed_pages: page_errors.len(),
            empty_pages,
            extracted_rows,
            admitted_rows,
            flagged_rows: flags.len(),
            total_duration_ms: total_start.elapsed().as_millis() as u64,
            llm_duration_ms,
        };
        info!(
            "Ingestion complete: {} transactions, {} flagged, {}ms",
            rows.len(),
            flags.len(),
            stats.total_duration_ms
        );

        Ok(IngestOutput {
            message: format!(
                "Extracted {} transactions from {} of {} pages",
                rows.len(),
                processed_pages,
                total_pages
            ),
            transactions: rows.iter().take(self.config.preview_rows).cloned().collect(),
            total_transactions: rows.len(),
            full_transactions: rows,
            download_id,
            run_id,
            issuer,
            flags,
            page_errors,
            stats,
        })
    }

    /// Ingest a statement PDF from disk.
    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> Result<IngestOutput, IngestError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let source_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.ingest(&bytes, &source_name).await
    }

    /// Record the user's accuracy verdict for a run.
    pub async fn confirm_accuracy(
        &self,
        run_id: &str,
        is_accurate: bool,
    ) -> Result<(), IngestError> {
        self.runs.confirm_accuracy(run_id, is_accurate).await
    }

    /// Submit corrected rows for a run; returns the diff analysis.
    pub async fn submit_feedback(
        &self,
        run_id: &str,
        corrected: &[crate::transaction::CanonicalRow],
    ) -> Result<DiffAnalysis, IngestError> {
        let record = self.runs.submit_feedback(run_id, corrected).await?;
        Ok(record.analysis)
    }

    /// The artifact store backing `GET /download/:id`.
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }
}
