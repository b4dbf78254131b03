//! Configuration for statement ingestion.
//!
//! [`IngestConfig`] gathers the engine's tunables — worker-pool bound,
//! balance tolerance, retry and deadline settings, upload cap — into one
//! serialisable value, so the config a run was handed can be logged next to
//! its run id and the run reproduced from it. The builder enforces the
//! handful of constraints the raw struct cannot express: a pool of at
//! least one and a finite, non-negative tolerance.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};

/// Default balance-equality tolerance, in the same units as the balances.
///
/// Statements in scope carry two-decimal amounts in a single currency, so a
/// tenth of a unit absorbs rounding drift in the extracted numbers without
/// masking a real discrepancy.
pub const DEFAULT_BALANCE_TOLERANCE: f64 = 0.10;

/// Default upload cap: 25 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

/// Configuration for one ingestion pipeline.
///
/// Built via [`IngestConfig::builder()`] or [`IngestConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2ledger::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .concurrency(2)
///     .balance_tolerance(0.05)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Upper bound on concurrent per-page LLM calls. Default: 4.
    ///
    /// The effective pool for a run is `min(pages, concurrency)`; LLM APIs
    /// are network-bound, so a small pool already removes most of the
    /// wall-clock cost of multi-page statements.
    pub concurrency: usize,

    /// Absolute tolerance when comparing a row's stated running balance
    /// against the computed one. Default: [`DEFAULT_BALANCE_TOLERANCE`].
    pub balance_tolerance: f64,

    /// Maximum retry attempts per page on a transient LLM failure. Default: 2.
    ///
    /// Parse failures are not retried — a model that returned prose instead
    /// of JSON will usually do so again, and the page is recoverable by skip.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds; doubles per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-LLM-call deadline in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Whole-pipeline deadline in seconds. Default: 300.
    pub pipeline_timeout_secs: u64,

    /// Upload size cap in bytes. Default: [`DEFAULT_MAX_UPLOAD_BYTES`].
    ///
    /// The transport layer is expected to reject oversized uploads before
    /// the engine is entered; the engine still fails closed.
    pub max_upload_bytes: u64,

    /// Number of rows included in the response preview. Default: 5.
    pub preview_rows: usize,

    /// Skip LLM-based issuer classification and use this tag directly.
    pub issuer_override: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            balance_tolerance: DEFAULT_BALANCE_TOLERANCE,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            pipeline_timeout_secs: 300,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            preview_rows: 5,
            issuer_override: None,
        }
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn balance_tolerance(mut self, tolerance: f64) -> Self {
        self.config.balance_tolerance = tolerance;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn pipeline_timeout_secs(mut self, secs: u64) -> Self {
        self.config.pipeline_timeout_secs = secs.max(1);
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn preview_rows(mut self, n: usize) -> Self {
        self.config.preview_rows = n;
        self
    }

    pub fn issuer_override(mut self, tag: impl Into<String>) -> Self {
        self.config.issuer_override = Some(tag.into());
        self
    }

    /// Validate and produce the final configuration.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(IngestError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        if !c.balance_tolerance.is_finite() || c.balance_tolerance < 0.0 {
            return Err(IngestError::InvalidConfig(format!(
                "balance tolerance must be a finite non-negative number, got {}",
                c.balance_tolerance
            )));
        }
        if c.max_upload_bytes == 0 {
            return Err(IngestError::InvalidConfig(
                "max upload size must be non-zero".into(),
            ));
        }
        Ok(self.config)
    }
}
