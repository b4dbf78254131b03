//! Persistence: prompt resolution and durable run/feedback records.
//!
//! The pipeline sees storage only through the narrow [`PromptStore`] and
//! [`RunStore`] traits, injected into the orchestrator the same way the LLM
//! provider is. [`SqliteStore`] implements both on a single SQLite database;
//! its calls run under `spawn_blocking` so store I/O never stalls the async
//! workers.
//!
//! Runs are append-only: after creation the only mutable field is the user's
//! accuracy confirmation. Feedback submissions are immutable and cascade
//! away with their run.

use crate::diff::{diff_rows, DiffAnalysis};
use crate::error::IngestError;
use crate::prompts::DEFAULT_EXTRACTION_PROMPT;
use crate::transaction::{CanonicalRow, FlagSummary};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    source_name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    model_tag TEXT NOT NULL,
    prompt_id TEXT NOT NULL,
    raw_rows TEXT NOT NULL,
    flags TEXT NOT NULL,
    user_accuracy_confirmed INTEGER
);

CREATE TABLE IF NOT EXISTS feedback (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    submitted_at TEXT NOT NULL,
    corrected_rows TEXT NOT NULL,
    analysis TEXT NOT NULL,
    FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_feedback_run ON feedback(run_id);

CREATE TABLE IF NOT EXISTS prompts (
    id TEXT PRIMARY KEY,
    issuer_tag TEXT,
    text TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_default INTEGER NOT NULL DEFAULT 0
);
";

/// An active extraction prompt resolved for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivePrompt {
    pub id: String,
    pub text: String,
}

/// A persisted processing run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub source_name: String,
    pub created_at: String,
    pub model_tag: String,
    pub prompt_id: String,
    pub rows: Vec<CanonicalRow>,
    pub flags: Vec<FlagSummary>,
    /// `None` until the user confirms or rejects the extraction.
    pub user_accuracy_confirmed: Option<bool>,
}

/// A persisted feedback submission, including its diff analysis.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub run_id: String,
    pub submitted_at: String,
    pub corrected_rows: Vec<CanonicalRow>,
    pub analysis: DiffAnalysis,
}

/// Resolves the active extraction prompt for an issuer slot.
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Return the active prompt for `issuer_tag`, falling back to the
    /// default slot; [`IngestError::NoPromptConfigured`] when neither exists.
    async fn resolve_prompt(&self, issuer_tag: Option<&str>) -> Result<ActivePrompt, IngestError>;
}

/// Durable storage for runs and feedback submissions.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(
        &self,
        source_name: &str,
        rows: &[CanonicalRow],
        flags: &[FlagSummary],
        model_tag: &str,
        prompt_id: &str,
    ) -> Result<String, IngestError>;

    /// Record the user's accuracy verdict. Idempotent in the verdict;
    /// [`IngestError::RunNotFound`] when the run does not exist.
    async fn confirm_accuracy(&self, run_id: &str, is_accurate: bool) -> Result<(), IngestError>;

    async fn get_run(&self, run_id: &str) -> Result<RunRecord, IngestError>;

    /// Store a user correction together with its diff analysis, atomically.
    async fn submit_feedback(
        &self,
        run_id: &str,
        corrected: &[CanonicalRow],
    ) -> Result<FeedbackRecord, IngestError>;

    /// Delete a run; its feedback submissions cascade away with it.
    async fn delete_run(&self, run_id: &str) -> Result<(), IngestError>;
}

/// SQLite-backed implementation of both store traits.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a store at `db_path` and ensure the schema and the
    /// default prompt slot exist.
    pub fn open(db_path: &Path) -> Result<Self, IngestError> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// In-memory store, mainly for tests and one-shot CLI runs.
    pub fn open_in_memory() -> Result<Self, IngestError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, IngestError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        seed_default_prompt(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Install a new active prompt for a slot, superseding the previous one.
    ///
    /// The slot with `issuer_tag = None` is the default; it always stays
    /// populated because a new version replaces, never removes.
    pub async fn upsert_prompt(
        &self,
        issuer_tag: Option<String>,
        text: String,
    ) -> Result<String, IngestError> {
        self.with_conn(move |conn| {
            let version: i64 = conn.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM prompts WHERE issuer_tag IS ?1",
                params![issuer_tag],
                |row| row.get(0),
            )?;
            conn.execute(
                "UPDATE prompts SET is_active = 0 WHERE issuer_tag IS ?1",
                params![issuer_tag],
            )?;
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO prompts (id, issuer_tag, text, version, is_active, is_default) \
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                params![id, issuer_tag, text, version + 1, issuer_tag.is_none()],
            )?;
            Ok(id)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, IngestError>
    where
        F: FnOnce(&Connection) -> Result<T, IngestError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| IngestError::Internal("store mutex poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| IngestError::Internal(format!("store task panicked: {e}")))?
    }
}

/// The default prompt slot must always contain an active row; the engine
/// fails closed if it is missing. First open seeds it from the built-in.
fn seed_default_prompt(conn: &Connection) -> Result<(), IngestError> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM prompts WHERE issuer_tag IS NULL AND is_active = 1",
        [],
        |row| row.get(0),
    )?;
    if count == 0 {
        conn.execute(
            "INSERT INTO prompts (id, issuer_tag, text, version, is_active, is_default) \
             VALUES (?1, NULL, ?2, 1, 1, 1)",
            params![Uuid::new_v4().to_string(), DEFAULT_EXTRACTION_PROMPT],
        )?;
        info!("seeded default extraction prompt");
    }
    Ok(())
}

fn resolve_slot(conn: &Connection, issuer_tag: Option<&str>) -> Result<Option<ActivePrompt>, IngestError> {
    let prompt = conn
        .query_row(
            "SELECT id, text FROM prompts \
             WHERE issuer_tag IS ?1 AND is_active = 1 \
             ORDER BY version DESC LIMIT 1",
            params![issuer_tag],
            |row| {
                Ok(ActivePrompt {
                    id: row.get(0)?,
                    text: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(prompt)
}

#[async_trait]
impl PromptStore for SqliteStore {
    async fn resolve_prompt(&self, issuer_tag: Option<&str>) -> Result<ActivePrompt, IngestError> {
        let issuer = issuer_tag.map(str::to_string);
        self.with_conn(move |conn| {
            if let Some(tag) = issuer.as_deref() {
                if let Some(prompt) = resolve_slot(conn, Some(tag))? {
                    return Ok(prompt);
                }
            }
            resolve_slot(conn, None)?.ok_or(IngestError::NoPromptConfigured)
        })
        .await
    }
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn create_run(
        &self,
        source_name: &str,
        rows: &[CanonicalRow],
        flags: &[FlagSummary],
        model_tag: &str,
        prompt_id: &str,
    ) -> Result<String, IngestError> {
        let id = Uuid::new_v4().to_string();
        let run_id = id.clone();
        let source_name = source_name.to_string();
        let model_tag = model_tag.to_string();
        let prompt_id = prompt_id.to_string();
        let rows_json = serde_json::to_string(rows)?;
        let flags_json = serde_json::to_string(flags)?;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO runs (id, source_name, created_at, model_tag, prompt_id, raw_rows, flags) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    run_id,
                    source_name,
                    Utc::now().to_rfc3339(),
                    model_tag,
                    prompt_id,
                    rows_json,
                    flags_json
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(id)
    }

    async fn confirm_accuracy(&self, run_id: &str, is_accurate: bool) -> Result<(), IngestError> {
        let id = run_id.to_string();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE runs SET user_accuracy_confirmed = ?1 WHERE id = ?2",
                params![is_accurate, id],
            )?;
            if updated == 0 {
                return Err(IngestError::RunNotFound { id });
            }
            Ok(())
        })
        .await
    }

    async fn get_run(&self, run_id: &str) -> Result<RunRecord, IngestError> {
        let id = run_id.to_string();
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    "SELECT id, source_name, created_at, model_tag, prompt_id, raw_rows, flags, \
                            user_accuracy_confirmed \
                     FROM runs WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, Option<bool>>(7)?,
                        ))
                    },
                )
                .optional()?
                .ok_or(IngestError::RunNotFound { id })?;

            Ok(RunRecord {
                id: record.0,
                source_name: record.1,
                created_at: record.2,
                model_tag: record.3,
                prompt_id: record.4,
                rows: serde_json::from_str(&record.5)?,
                flags: serde_json::from_str(&record.6)?,
                user_accuracy_confirmed: record.7,
            })
        })
        .await
    }

    async fn submit_feedback(
        &self,
        run_id: &str,
        corrected: &[CanonicalRow],
    ) -> Result<FeedbackRecord, IngestError> {
        let id = run_id.to_string();
        let corrected = corrected.to_vec();
        self.with_conn(move |conn| {
            // Diff against the stored rows and persist in one transaction so
            // a submission never exists without its analysis.
            let tx = conn.unchecked_transaction()?;
            let original_json: String = tx
                .query_row(
                    "SELECT raw_rows FROM runs WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| IngestError::RunNotFound { id: id.clone() })?;
            let original: Vec<CanonicalRow> = serde_json::from_str(&original_json)?;

            let analysis = diff_rows(&original, &corrected);
            let record = FeedbackRecord {
                id: Uuid::new_v4().to_string(),
                run_id: id,
                submitted_at: Utc::now().to_rfc3339(),
                corrected_rows: corrected,
                analysis,
            };
            tx.execute(
                "INSERT INTO feedback (id, run_id, submitted_at, corrected_rows, analysis) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.run_id,
                    record.submitted_at,
                    serde_json::to_string(&record.corrected_rows)?,
                    serde_json::to_string(&record.analysis)?
                ],
            )?;
            tx.commit()?;
            Ok(record)
        })
        .await
    }

    async fn delete_run(&self, run_id: &str) -> Result<(), IngestError> {
        let id = run_id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM runs WHERE id = ?1", params![id])?;
            if deleted == 0 {
                return Err(IngestError::RunNotFound { id });
            }
            Ok(())
        })
        .await
    }
}
