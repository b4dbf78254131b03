//! Key normalization: heterogeneous issuer rows → canonical rows.
//!
//! Every issuer names its columns differently ("Transaction Remarks" vs
//! "Narration", "Withdrawal (Dr)" vs "Debit"). All of that variance is
//! resolved here, in one place, through fixed priority tables — past this
//! module the schema is closed and the reconciler never sees an
//! issuer-shaped key again.
//!
//! Rows that cannot be resolved into the canonical schema are dropped and
//! logged; they are never silently kept.

use crate::transaction::{
    is_opening_balance_description, CanonicalRow, RawRow, RowValue, TxnType,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Candidate source keys per canonical field; first non-empty wins.
const DATE_KEYS: &[&str] = &["date", "Transaction Date", "Value Date", "Date"];
const DESCRIPTION_KEYS: &[&str] = &[
    "description",
    "Transaction Remarks",
    "Narration",
    "Transaction details",
];
const BALANCE_KEYS: &[&str] = &["running_balance", "Balance"];
const DEBIT_KEYS: &[&str] = &["Debit", "Withdrawal (Dr)"];
const CREDIT_KEYS: &[&str] = &["Credit", "Deposit(Cr)"];

static RE_WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapse whitespace runs (including embedded newlines and tabs) to a
/// single space and trim.
pub fn clean_key(key: &str) -> String {
    RE_WHITESPACE_RUN.replace_all(key.trim(), " ").to_string()
}

/// Normalize a batch of raw rows, dropping the ones that cannot be admitted.
pub fn normalize_rows(raw_rows: Vec<RawRow>) -> Vec<CanonicalRow> {
    let mut admitted = Vec::with_capacity(raw_rows.len());
    for (i, raw) in raw_rows.into_iter().enumerate() {
        match normalize_row(&raw) {
            Some(row) => admitted.push(row),
            None => warn!("dropping unadmittable extracted row {i}: {raw:?}"),
        }
    }
    admitted
}

/// Normalize a single raw row. `None` when the row fails admission.
pub fn normalize_row(raw: &RawRow) -> Option<CanonicalRow> {
    // Step 1 — key cleaning.
    let row: RawRow = raw
        .iter()
        .map(|(k, v)| (clean_key(k), v.clone()))
        .collect();

    // Step 2 — field resolution.
    let date = resolve_text(&row, DATE_KEYS)?;
    let description = resolve_description(&row)?;
    let running_balance = resolve_number(&row, BALANCE_KEYS)?;

    // Step 3 — amount/type resolution.
    let (amount, txn_type) = resolve_amount_and_type(&row, &description)?;

    Some(CanonicalRow::new(
        date,
        description,
        amount,
        txn_type,
        Some(running_balance),
    ))
}

/// First candidate key holding non-empty text.
fn resolve_text(row: &RawRow, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(value) = row.get(*key) {
            if let Some(text) = value.as_text() {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }
    None
}

/// Descriptions may be legitimately empty: when no candidate holds text but
/// one of the keys is present, the row is admitted with an empty string.
/// Newlines are collapsed to single spaces.
fn resolve_description(row: &RawRow) -> Option<String> {
    if let Some(text) = resolve_text(row, DESCRIPTION_KEYS) {
        return Some(RE_WHITESPACE_RUN.replace_all(&text, " ").trim().to_string());
    }
    if DESCRIPTION_KEYS.iter().any(|k| row.contains_key(*k)) {
        return Some(String::new());
    }
    None
}

/// First candidate key holding a parseable number (commas stripped).
fn resolve_number(row: &RawRow, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(n) = row.get(*key).and_then(RowValue::as_number) {
            return Some(n);
        }
    }
    None
}

/// Resolve `(amount, type)` per the admission rules.
///
/// `None` means the row carries no resolvable movement and is dropped —
/// including the ambiguous case where both debit and credit candidates are
/// zero on a non-opening row.
fn resolve_amount_and_type(
    row: &RawRow,
    description: &str,
) -> Option<(Option<f64>, Option<TxnType>)> {
    // A row that already carries a valid (amount, type) pair wins.
    if let (Some(RowValue::Number(amount)), Some(type_value)) =
        (row.get("amount"), row.get("type"))
    {
        if let Some(txn_type) = type_value.as_text().as_deref().and_then(TxnType::parse) {
            return Some((Some(amount.abs()), Some(txn_type)));
        }
    }

    let debit = resolve_number(row, DEBIT_KEYS).unwrap_or(0.0);
    let credit = resolve_number(row, CREDIT_KEYS).unwrap_or(0.0);

    if debit > 0.0 {
        Some((Some(debit), Some(TxnType::Debit)))
    } else if credit > 0.0 {
        Some((Some(credit), Some(TxnType::Credit)))
    } else if is_opening_balance_description(description) {
        Some((Some(0.0), None))
    } else {
        None
    }
}
