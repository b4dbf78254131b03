//! Transaction data model: the boundary between what the LLM produces and
//! what the reconciliation engine consumes.
//!
//! Two representations exist on purpose:
//!
//! * [`RawRow`] — an open, issuer-shaped map exactly as extracted from one
//!   statement line. Keys are whatever the bank's layout calls its columns
//!   ("Transaction Remarks", "Withdrawal (Dr)", …); values are loosely typed.
//!
//! * [`CanonicalRow`] — the closed record every downstream stage operates on.
//!   All issuer variance is resolved by the key normalizer
//!   ([`crate::pipeline::normalize`]); past that point the schema is fixed.
//!
//! Keeping the open/closed boundary explicit means the reconciler never has
//! to guess what a field is called or whether a number arrived as a string.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single loosely-typed cell value from the LLM's extraction output.
///
/// JSON booleans are folded into their text form and nested structures into
/// `Null` — statements don't contain either, and a lossy fold keeps one odd
/// cell from failing a whole page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowValue {
    Text(String),
    Number(f64),
    Null,
}

impl RowValue {
    /// Build from an arbitrary JSON value.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => RowValue::Text(s.clone()),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(RowValue::Number)
                .unwrap_or(RowValue::Null),
            serde_json::Value::Bool(b) => RowValue::Text(b.to_string()),
            _ => RowValue::Null,
        }
    }

    /// The value as text, if it carries any. Numbers are rendered with their
    /// natural `Display` form; `Null` yields `None`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RowValue::Text(s) => Some(s.clone()),
            RowValue::Number(n) => Some(n.to_string()),
            RowValue::Null => None,
        }
    }

    /// Parse the value as a decimal number. Text values have thousands
    /// separators stripped first ("25,000.75" → 25000.75).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            RowValue::Number(n) => Some(*n),
            RowValue::Text(s) => {
                let cleaned = s.replace(',', "");
                let cleaned = cleaned.trim();
                if cleaned.is_empty() {
                    None
                } else {
                    cleaned.parse::<f64>().ok()
                }
            }
            RowValue::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RowValue::Null)
    }
}

/// One extracted statement line, keyed by issuer-shaped column names.
///
/// A `BTreeMap` keeps iteration (and serialized output) deterministic.
pub type RawRow = BTreeMap<String, RowValue>;

/// Direction of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnType {
    Credit,
    Debit,
}

impl TxnType {
    /// The sign this type applies to an amount in balance arithmetic.
    pub fn sign(self) -> f64 {
        match self {
            TxnType::Credit => 1.0,
            TxnType::Debit => -1.0,
        }
    }

    /// The opposite direction, used by the reconciler's type-flip repair.
    pub fn flipped(self) -> TxnType {
        match self {
            TxnType::Credit => TxnType::Debit,
            TxnType::Debit => TxnType::Credit,
        }
    }

    pub fn parse(s: &str) -> Option<TxnType> {
        match s.trim().to_ascii_lowercase().as_str() {
            "credit" => Some(TxnType::Credit),
            "debit" => Some(TxnType::Debit),
            _ => None,
        }
    }
}

/// The engine's canonical transaction record.
///
/// `amount` and `txn_type` are `None` together exactly once per statement:
/// on the opening-balance row. `running_balance` is `None` only for rows the
/// reconciler will flag as structurally invalid — the normalizer never
/// admits a row without one, but corrected rows re-entering through the
/// feedback path are not guaranteed to carry it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRow {
    pub date: String,
    pub description: String,
    pub amount: Option<f64>,
    #[serde(rename = "type")]
    pub txn_type: Option<TxnType>,
    pub running_balance: Option<f64>,

    // Provenance flags, populated by the reconciler.
    #[serde(default)]
    pub balance_mismatch: bool,
    #[serde(default)]
    pub type_corrected: bool,
    #[serde(default)]
    pub invalid_structure: bool,
}

impl CanonicalRow {
    pub fn new(
        date: impl Into<String>,
        description: impl Into<String>,
        amount: Option<f64>,
        txn_type: Option<TxnType>,
        running_balance: Option<f64>,
    ) -> Self {
        Self {
            date: date.into(),
            description: description.into(),
            amount,
            txn_type,
            running_balance,
            balance_mismatch: false,
            type_corrected: false,
            invalid_structure: false,
        }
    }

    /// An opening-balance row carries only a balance: zero amount, no type.
    pub fn is_opening_balance(&self) -> bool {
        self.txn_type.is_none() && self.amount == Some(0.0)
    }

    /// True when any provenance flag is set.
    pub fn is_flagged(&self) -> bool {
        self.balance_mismatch || self.type_corrected || self.invalid_structure
    }

    /// The amount with its directional sign applied; `None` for opening
    /// balance rows and structurally deficient rows.
    pub fn signed_amount(&self) -> Option<f64> {
        match (self.amount, self.txn_type) {
            (Some(a), Some(t)) => Some(t.sign() * a),
            _ => None,
        }
    }
}

/// Whether a description marks the opening-balance line of a statement.
pub fn is_opening_balance_description(description: &str) -> bool {
    description.to_ascii_lowercase().contains("opening balance")
}

/// Compact flag record persisted alongside a run: one entry per row that has
/// at least one flag set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagSummary {
    pub row_index: usize,
    pub balance_mismatch: bool,
    pub type_corrected: bool,
    pub invalid_structure: bool,
}

/// Collect the flag summary for a reconciled row list.
pub fn summarize_flags(rows: &[CanonicalRow]) -> Vec<FlagSummary> {
    rows.iter()
        .enumerate()
        .filter(|(_, r)| r.is_flagged())
        .map(|(i, r)| FlagSummary {
            row_index: i,
            balance_mismatch: r.balance_mismatch,
            type_corrected: r.type_corrected,
            invalid_structure: r.invalid_structure,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_value_parses_comma_separated_numbers() {
        assert_eq!(
            RowValue::Text("25,000.75".into()).as_number(),
            Some(25000.75)
        );
        assert_eq!(RowValue::Text("  1,500.50 ".into()).as_number(), Some(1500.5));
        assert_eq!(RowValue::Text("".into()).as_number(), None);
        assert_eq!(RowValue::Text("n/a".into()).as_number(), None);
        assert_eq!(RowValue::Number(12.5).as_number(), Some(12.5));
        assert_eq!(RowValue::Null.as_number(), None);
    }

    #[test]
    fn row_value_from_json_folds_odd_shapes() {
        assert_eq!(
            RowValue::from_json(&serde_json::json!(true)),
            RowValue::Text("true".into())
        );
        assert_eq!(RowValue::from_json(&serde_json::json!([1, 2])), RowValue::Null);
        assert_eq!(RowValue::from_json(&serde_json::json!(null)), RowValue::Null);
    }

    #[test]
    fn signed_amount_follows_type() {
        let credit = CanonicalRow::new("01/04/2024", "x", Some(50.0), Some(TxnType::Credit), Some(100.0));
        let debit = CanonicalRow::new("01/04/2024", "x", Some(50.0), Some(TxnType::Debit), Some(100.0));
        assert_eq!(credit.signed_amount(), Some(50.0));
        assert_eq!(debit.signed_amount(), Some(-50.0));
    }

    #[test]
    fn opening_balance_shape() {
        let opening = CanonicalRow::new("01/04/2024", "OPENING BALANCE", Some(0.0), None, Some(1000.0));
        assert!(opening.is_opening_balance());
        assert!(is_opening_balance_description("Opening Balance"));
        assert!(is_opening_balance_description("OPENING BALANCE B/F"));
        assert!(!is_opening_balance_description("Groceries"));
    }

    #[test]
    fn canonical_row_serde_uses_type_key() {
        let row = CanonicalRow::new("01/04/2024", "Salary", Some(500.0), Some(TxnType::Credit), Some(1500.0));
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["type"], "credit");
        let back: CanonicalRow = serde_json::from_value(json).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn flag_summary_only_covers_flagged_rows() {
        let mut rows = vec![
            CanonicalRow::new("01", "a", Some(1.0), Some(TxnType::Credit), Some(1.0)),
            CanonicalRow::new("02", "b", Some(1.0), Some(TxnType::Debit), Some(0.0)),
        ];
        rows[1].balance_mismatch = true;
        let flags = summarize_flags(&rows);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].row_index, 1);
        assert!(flags[0].balance_mismatch);
    }
}
