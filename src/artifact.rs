//! CSV artifact store: materialize reconciled runs and serve them back by id.
//!
//! Artifacts are plain files under one export directory. Ids are generated
//! (UUID + `.csv`) and validated on retrieval against a conservative
//! character class, so a handle arriving from a URL path can never traverse
//! outside the export directory.

use crate::error::IngestError;
use crate::transaction::CanonicalRow;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

static RE_ARTIFACT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+\.csv$").unwrap());

/// Header row of every ledger artifact.
pub const CSV_COLUMNS: &[&str] = &[
    "date",
    "description",
    "amount",
    "type",
    "running_balance",
    "balance_mismatch",
    "type_corrected",
    "invalid_structure",
];

/// Directory-rooted store for ledger CSV artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, IngestError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a reconciled row list as a CSV artifact and return its id.
    ///
    /// The write is atomic (temp file + rename) so a crashed run never
    /// leaves a half-written artifact behind.
    pub fn write_rows(&self, rows: &[CanonicalRow]) -> Result<String, IngestError> {
        let id = format!("{}.csv", Uuid::new_v4());
        let tmp_path = self.dir.join(format!("{id}.tmp"));
        let final_path = self.dir.join(&id);

        {
            let mut writer = csv::Writer::from_path(&tmp_path)?;
            writer.write_record(CSV_COLUMNS)?;
            for row in rows {
                writer.write_record(csv_record(row))?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp_path, &final_path)?;

        debug!(artifact = %id, rows = rows.len(), "wrote ledger artifact");
        Ok(id)
    }

    /// Resolve an artifact id to its file path.
    ///
    /// # Errors
    /// [`IngestError::ArtifactNotFound`] when the id fails validation or no
    /// file exists for it.
    pub fn resolve(&self, id: &str) -> Result<PathBuf, IngestError> {
        if !RE_ARTIFACT_ID.is_match(id) {
            return Err(IngestError::ArtifactNotFound { id: id.to_string() });
        }
        let path = self.dir.join(id);
        if !path.is_file() {
            return Err(IngestError::ArtifactNotFound { id: id.to_string() });
        }
        Ok(path)
    }

    /// Read an artifact's CSV content.
    pub fn read(&self, id: &str) -> Result<String, IngestError> {
        let path = self.resolve(id)?;
        std::fs::read_to_string(&path).map_err(|_| IngestError::ArtifactNotFound {
            id: id.to_string(),
        })
    }
}

/// Render a row as CSV cells; null is the empty string, booleans are
/// `true`/`false`.
fn csv_record(row: &CanonicalRow) -> Vec<String> {
    vec![
        row.date.clone(),
        row.description.clone(),
        row.amount.map(|a| a.to_string()).unwrap_or_default(),
        row.txn_type
            .map(|t| match t {
                crate::transaction::TxnType::Credit => "credit".to_string(),
                crate::transaction::TxnType::Debit => "debit".to_string(),
            })
            .unwrap_or_default(),
        row.running_balance.map(|b| b.to_string()).unwrap_or_default(),
        row.balance_mismatch.to_string(),
        row.type_corrected.to_string(),
        row.invalid_structure.to_string(),
    ]
}
