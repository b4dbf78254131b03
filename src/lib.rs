//! # pdf2ledger
//!
//! Convert bank-statement PDFs into a normalized, reconciled transaction
//! ledger using text LLMs.
//!
//! ## Why this crate?
//!
//! Statements arrive in hundreds of issuer-specific layouts, so template
//! parsers break on every new bank. This crate delegates the *structural*
//! reading of each page to an LLM and keeps everything that must be
//! deterministic — page segmentation, schema normalization, running-balance
//! reconciliation, type-flip repair, durable run records — in plain Rust,
//! where it can be tested and trusted.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Split      per-page text extraction (CPU-bound, spawn_blocking)
//!  ├─ 2. Classify   advisory issuer tag from page-1 text (LLM)
//!  ├─ 3. Extract    concurrent per-page LLM calls → raw issuer-shaped rows
//!  ├─ 4. Normalize  alias tables fold issuer keys onto the canonical schema
//!  ├─ 5. Reconcile  running-balance validation, type-flip repair, flags
//!  └─ 6. Output     CSV artifact + persisted run + JSON-ready response
//! ```
//!
//! The reconciler is the heart of the engine: each row's stated running
//! balance is checked against the previous valid row, a mis-assigned
//! debit/credit is repaired when flipping it satisfies the arithmetic, and
//! anything unrepairable is flagged — never dropped, never fatal.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2ledger::{
//!     ArtifactStore, HttpTextCompletion, IngestConfig, Ingestor, SqliteStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Arc::new(
//!         HttpTextCompletion::from_env().expect("set PDF2LEDGER_API_KEY or OPENAI_API_KEY"),
//!     );
//!     let store = Arc::new(SqliteStore::open("runs.db".as_ref())?);
//!     let ingestor = Ingestor::new(
//!         provider,
//!         store.clone(),
//!         store,
//!         ArtifactStore::new("exports")?,
//!         IngestConfig::default(),
//!     );
//!
//!     let bytes = std::fs::read("statement.pdf")?;
//!     let output = ingestor.ingest(&bytes, "statement.pdf").await?;
//!     println!("{} transactions → {}", output.total_transactions, output.download_id);
//!     for flag in &output.flags {
//!         eprintln!("row {} flagged", flag.row_index);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2ledger` binary (clap + anyhow + tracing-subscriber) |
//!
//! Library-only consumers can drop the binary's dependencies:
//! ```toml
//! pdf2ledger = { version = "0.1", default-features = false, features = ["native-tls"] }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifact;
pub mod config;
pub mod diff;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod store;
pub mod transaction;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifact::ArtifactStore;
pub use config::{IngestConfig, IngestConfigBuilder, DEFAULT_BALANCE_TOLERANCE};
pub use diff::{CellChange, DiffAnalysis};
pub use error::{IngestError, PageError};
pub use ingest::Ingestor;
pub use llm::{CompletionError, HttpTextCompletion, TextCompletion};
pub use output::{IngestOutput, IngestStats, PageExtraction};
pub use store::{ActivePrompt, FeedbackRecord, PromptStore, RunRecord, RunStore, SqliteStore};
pub use transaction::{CanonicalRow, FlagSummary, RawRow, RowValue, TxnType};
