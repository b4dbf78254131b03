//! Balance reconciliation: validate every row against the running balance,
//! repair mis-assigned transaction types, and flag what cannot be repaired.
//!
//! ## The repair policy
//!
//! LLM extractions mis-assign debit/credit far more often than they mis-read
//! an amount or a balance — the sign/column convention varies per issuer
//! while magnitudes are visually unambiguous. A single type flip is the only
//! repair attempted: it cannot hide a real error (the arithmetic must still
//! match) and costs one extra subtraction. Multi-row repairs are refused;
//! they would let a cascade of extraction errors camouflage each other.
//!
//! ## Terminal states per row
//!
//! | State     | Flags                                        |
//! |-----------|----------------------------------------------|
//! | OK        | none                                         |
//! | Corrected | `type_corrected`, balance holds after flip   |
//! | Mismatch  | `balance_mismatch`, no single-flip repair    |
//! | Invalid   | `invalid_structure` (implies mismatch)       |
//!
//! The pass is strictly sequential — each row reconciles against the most
//! recent row that satisfies the validity predicate — and idempotent: a
//! corrected row satisfies the balance equation on a second pass, and
//! success never clears `type_corrected`.

use crate::transaction::CanonicalRow;

/// Slack added to the tolerance comparison so that a delta exactly equal to
/// the tolerance survives f64 rounding.
const EPSILON_SLACK: f64 = 1e-9;

/// Structural validity: the row carries everything balance arithmetic needs.
///
/// Correctness is deliberately not part of this predicate — a row whose
/// balance mismatches still anchors the rows after it.
pub fn is_structurally_valid(row: &CanonicalRow) -> bool {
    if row.date.trim().is_empty() {
        return false;
    }
    if !row.running_balance.is_some_and(f64::is_finite) {
        return false;
    }
    let has_movement = matches!(
        (row.amount, row.txn_type),
        (Some(a), Some(_)) if a.is_finite()
    );
    has_movement || row.is_opening_balance()
}

/// Reconcile a chronologically ordered row list.
///
/// Returns the same rows with provenance flags populated and, where a single
/// type flip satisfies the balance equation, the `type` repaired in place.
pub fn reconcile(mut rows: Vec<CanonicalRow>, tolerance: f64) -> Vec<CanonicalRow> {
    let Some(first_valid) = rows.iter().position(is_structurally_valid) else {
        for row in &mut rows {
            mark_invalid(row);
        }
        return rows;
    };

    for row in &mut rows[..first_valid] {
        mark_invalid(row);
    }
    clear_check_flags(&mut rows[first_valid]);

    let mut prev = first_valid;
    for i in (first_valid + 1)..rows.len() {
        if !is_structurally_valid(&rows[i]) {
            mark_invalid(&mut rows[i]);
            continue;
        }

        // Opening-balance rows carry no arithmetic but anchor what follows.
        if rows[i].is_opening_balance() {
            clear_check_flags(&mut rows[i]);
            prev = i;
            continue;
        }

        let (prev_balance, actual, signed) = match (
            rows[prev].running_balance,
            rows[i].running_balance,
            rows[i].signed_amount(),
        ) {
            (Some(p), Some(a), Some(s)) => (p, a, s),
            _ => {
                mark_invalid(&mut rows[i]);
                continue;
            }
        };

        let expected = prev_balance + signed;
        if (actual - expected).abs() <= tolerance + EPSILON_SLACK {
            // Original type satisfies the equation; with a zero amount both
            // directions would, and the original wins.
            clear_check_flags(&mut rows[i]);
        } else {
            let expected_flipped = prev_balance - signed;
            if (actual - expected_flipped).abs() <= tolerance + EPSILON_SLACK {
                if let Some(t) = rows[i].txn_type {
                    rows[i].txn_type = Some(t.flipped());
                }
                rows[i].type_corrected = true;
                rows[i].balance_mismatch = false;
                rows[i].invalid_structure = false;
            } else {
                rows[i].balance_mismatch = true;
                rows[i].invalid_structure = false;
            }
        }

        prev = i;
    }

    rows
}

fn mark_invalid(row: &mut CanonicalRow) {
    row.invalid_structure = true;
    row.balance_mismatch = true;
}

/// Success clears the check flags only; `type_corrected` is sticky so a
/// second pass over already-reconciled rows is a no-op.
fn clear_check_flags(row: &mut CanonicalRow) {
    row.balance_mismatch = false;
    row.invalid_structure = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BALANCE_TOLERANCE;
    use crate::transaction::TxnType;

    fn opening(balance: f64) -> CanonicalRow {
        CanonicalRow::new("01/04/2024", "OPENING BALANCE", Some(0.0), None, Some(balance))
    }

    fn row(date: &str, desc: &str, amount: f64, t: TxnType, balance: f64) -> CanonicalRow {
        CanonicalRow::new(date, desc, Some(amount), Some(t), Some(balance))
    }

    fn run(rows: Vec<CanonicalRow>) -> Vec<CanonicalRow> {
        reconcile(rows, DEFAULT_BALANCE_TOLERANCE)
    }

    #[test]
    fn happy_path_mixed_credit_debit() {
        // S1: opening 1000 → +500 salary → −120 groceries.
        let out = run(vec![
            opening(1000.0),
            row("02/04/2024", "Salary", 500.0, TxnType::Credit, 1500.0),
            row("03/04/2024", "Groceries", 120.0, TxnType::Debit, 1380.0),
        ]);
        assert!(out.iter().all(|r| !r.is_flagged()), "{out:?}");
    }

    #[test]
    fn type_flip_repairs_misassigned_credit() {
        // S2: the salary row arrives tagged as a debit.
        let out = run(vec![
            opening(1000.0),
            row("02/04/2024", "Salary", 500.0, TxnType::Debit, 1500.0),
            row("03/04/2024", "Groceries", 120.0, TxnType::Debit, 1380.0),
        ]);
        assert!(out[1].type_corrected);
        assert!(!out[1].balance_mismatch);
        assert_eq!(out[1].txn_type, Some(TxnType::Credit));
        assert!(!out[2].is_flagged());
    }

    #[test]
    fn unrepairable_mismatch_is_flagged_without_correction() {
        // S3: row 3 is off by 100 in both directions.
        let out = run(vec![
            opening(1000.0),
            row("02/04/2024", "Salary", 500.0, TxnType::Credit, 1500.0),
            row("03/04/2024", "Refund", 200.0, TxnType::Credit, 1600.0),
        ]);
        assert!(out[2].balance_mismatch);
        assert!(!out[2].type_corrected);
        assert_eq!(out[2].txn_type, Some(TxnType::Credit));
    }

    #[test]
    fn invalid_middle_row_is_skipped_for_chaining() {
        // S4: row 2 has no running balance; row 3 reconciles against row 1.
        let mut broken = row("02/04/2024", "Salary", 500.0, TxnType::Credit, 0.0);
        broken.running_balance = None;
        let out = run(vec![
            opening(1000.0),
            broken,
            row("03/04/2024", "Groceries", 120.0, TxnType::Debit, 880.0),
        ]);
        assert!(out[1].invalid_structure);
        assert!(out[1].balance_mismatch);
        assert!(!out[2].is_flagged(), "{out:?}");
    }

    #[test]
    fn mismatched_row_still_anchors_its_successor() {
        // The predicate is structural: a mismatch row is the next anchor.
        let out = run(vec![
            opening(1000.0),
            row("02/04", "Odd", 500.0, TxnType::Credit, 2000.0),
            row("03/04", "Next", 100.0, TxnType::Debit, 1900.0),
        ]);
        assert!(out[1].balance_mismatch);
        assert!(!out[2].is_flagged());
    }

    #[test]
    fn leading_invalid_rows_are_marked() {
        let mut noise = CanonicalRow::new("", "noise", None, None, None);
        noise.description = "garbled".into();
        let out = run(vec![noise, opening(1000.0)]);
        assert!(out[0].invalid_structure);
        assert!(out[0].balance_mismatch);
        assert!(!out[1].is_flagged());
    }

    #[test]
    fn all_invalid_marks_everything() {
        let bad = CanonicalRow::new("", "", None, None, None);
        let out = run(vec![bad.clone(), bad]);
        assert!(out.iter().all(|r| r.invalid_structure));
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(run(vec![]).is_empty());
    }

    #[test]
    fn delta_at_tolerance_is_accepted() {
        let out = run(vec![
            opening(1000.0),
            row("02/04", "x", 500.0, TxnType::Credit, 1500.10),
        ]);
        assert!(!out[1].is_flagged(), "{out:?}");
    }

    #[test]
    fn delta_just_past_tolerance_is_flagged() {
        let out = run(vec![
            opening(1000.0),
            row("02/04", "x", 500.0, TxnType::Credit, 1500.101),
        ]);
        assert!(out[1].balance_mismatch);
    }

    #[test]
    fn zero_amount_prefers_original_type() {
        // Both directions satisfy tolerance; no spurious correction.
        let out = run(vec![
            opening(1000.0),
            row("02/04", "fee reversal", 0.0, TxnType::Debit, 1000.0),
        ]);
        assert!(!out[1].type_corrected);
        assert_eq!(out[1].txn_type, Some(TxnType::Debit));
    }

    #[test]
    fn single_opening_row_carries_no_flags() {
        let out = run(vec![opening(1000.0)]);
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_flagged());
    }

    #[test]
    fn mid_stream_opening_row_re_anchors() {
        let out = run(vec![
            opening(1000.0),
            row("02/04", "x", 100.0, TxnType::Debit, 900.0),
            opening(5000.0),
            row("03/04", "y", 250.0, TxnType::Credit, 5250.0),
        ]);
        assert!(out.iter().all(|r| !r.is_flagged()), "{out:?}");
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut broken = row("02/04", "b", 500.0, TxnType::Credit, 0.0);
        broken.running_balance = None;
        let input = vec![
            opening(1000.0),
            row("02/04", "Salary", 500.0, TxnType::Debit, 1500.0), // will flip
            broken,
            row("03/04", "Odd", 10.0, TxnType::Debit, 400.0), // mismatch
        ];
        let once = run(input);
        let twice = run(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn first_valid_mid_list_anchors_the_rest() {
        let bad = CanonicalRow::new("", "", None, None, None);
        let out = run(vec![
            bad,
            row("02/04", "first real", 100.0, TxnType::Credit, 1100.0),
            row("03/04", "second", 50.0, TxnType::Debit, 1050.0),
        ]);
        assert!(out[0].invalid_structure);
        assert!(!out[1].is_flagged());
        assert!(!out[2].is_flagged());
    }
}
