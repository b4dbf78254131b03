//! Feedback diff analysis: score user corrections against the model output.
//!
//! The comparison is positional by design — matching rows by content would
//! mask exactly the edits we want to measure, and users can only re-order by
//! editing in place. Fields are compared through their textual
//! representation with `null` rendered as the empty string, mirroring how
//! the values appear in the editable preview.

use crate::transaction::CanonicalRow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The five user-editable data fields, in column order.
const DATA_FIELDS: &[&str] = &["date", "description", "amount", "type", "running_balance"];

/// One changed cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellChange {
    pub row_index: usize,
    pub field: String,
    pub old: String,
    pub new: String,
}

/// Summary of how a corrected row set differs from the original extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffAnalysis {
    pub rows_added: usize,
    pub rows_deleted: usize,
    pub rows_modified: usize,
    pub cell_changes: Vec<CellChange>,
    /// Per-field change counts, keyed by canonical field name.
    pub field_change_counts: BTreeMap<String, usize>,
}

/// Compare original and corrected rows element-wise up to the shorter length.
pub fn diff_rows(original: &[CanonicalRow], corrected: &[CanonicalRow]) -> DiffAnalysis {
    let mut analysis = DiffAnalysis {
        rows_added: corrected.len().saturating_sub(original.len()),
        rows_deleted: original.len().saturating_sub(corrected.len()),
        ..DiffAnalysis::default()
    };

    for (i, (orig, corr)) in original.iter().zip(corrected.iter()).enumerate() {
        let mut row_changed = false;
        for field in DATA_FIELDS {
            let old = field_text(orig, field);
            let new = field_text(corr, field);
            if old != new {
                row_changed = true;
                *analysis
                    .field_change_counts
                    .entry((*field).to_string())
                    .or_insert(0) += 1;
                analysis.cell_changes.push(CellChange {
                    row_index: i,
                    field: (*field).to_string(),
                    old,
                    new,
                });
            }
        }
        if row_changed {
            analysis.rows_modified += 1;
        }
    }

    analysis
}

/// Textual representation of a field; null renders as the empty string.
fn field_text(row: &CanonicalRow, field: &str) -> String {
    match field {
        "date" => row.date.clone(),
        "description" => row.description.clone(),
        "amount" => row.amount.map(|a| a.to_string()).unwrap_or_default(),
        "type" => row
            .txn_type
            .map(|t| match t {
                crate::transaction::TxnType::Credit => "credit".to_string(),
                crate::transaction::TxnType::Debit => "debit".to_string(),
            })
            .unwrap_or_default(),
        "running_balance" => row
            .running_balance
            .map(|b| b.to_string())
            .unwrap_or_default(),
        _ => String::new(),
    }
}
