//! Pipeline stages for statement-to-ledger conversion.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and lets us swap
//! implementations (e.g. switch the PDF backend) without touching other
//! stages.
//!
//! ## Data Flow
//!
//! ```text
//! split ──▶ classify ──▶ extract ──▶ normalize ──▶ reconcile
//! (pages)   (issuer)    (raw rows)   (canonical)   (flags)
//! ```
//!
//! 1. [`split`]     — bytes → per-page text; runs in `spawn_blocking`
//!    because PDF parsing is CPU-bound
//! 2. [`classify`]  — advisory issuer tag from page-1 text; the only stage
//!    allowed to fail silently
//! 3. [`extract`]   — per-page LLM call with retry/backoff; the only stage
//!    with network I/O, fanned out by the orchestrator
//! 4. [`normalize`] — issuer-shaped raw rows → closed canonical rows
//! 5. [`reconcile`] — running-balance validation, type-flip repair, flags;
//!    strictly sequential, each row depends on the last valid one

pub mod classify;
pub mod extract;
pub mod normalize;
pub mod reconcile;
pub mod split;
