//! End-to-end pipeline tests.
//!
//! These run the full ingestion path — PDF bytes through split, classify,
//! fan-out extraction, normalization, reconciliation, artifact emission and
//! persistence — against a scripted [`TextCompletion`] mock, so they are
//! hermetic and need no API key.
//!
//! The statement PDFs are built in-process: a minimal uncompressed PDF with
//! one Helvetica text object per page is enough for the splitter, and
//! building it here keeps the tests free of binary fixtures.

use async_trait::async_trait;
use pdf2ledger::{
    ArtifactStore, CanonicalRow, CompletionError, IngestConfig, IngestError, Ingestor, RunStore,
    SqliteStore, TextCompletion, TxnType,
};
use std::sync::Arc;

// ── Minimal PDF builder ──────────────────────────────────────────────────────

/// Build a valid single- or multi-page PDF carrying one line of text per page.
fn statement_pdf(page_texts: &[&str]) -> Vec<u8> {
    let n = page_texts.len();
    let font_obj_num = 3 + 2 * n;

    let mut objects: Vec<String> = Vec::with_capacity(2 + 2 * n + 1);
    let kids: Vec<String> = (0..n).map(|i| format!("{} 0 R", 3 + 2 * i)).collect();
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        n
    ));

    for (i, text) in page_texts.iter().enumerate() {
        let content_obj_num = 4 + 2 * i;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Contents {content_obj_num} 0 R \
             /Resources << /Font << /F1 {font_obj_num} 0 R >> >> >>"
        ));
        let escaped = text.replace('\\', r"\\").replace('(', r"\(").replace(')', r"\)");
        let stream = format!("BT /F1 12 Tf 72 720 Td ({escaped}) Tj ET");
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            stream.len(),
            stream
        ));
    }

    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string());

    let mut buf = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, obj) in objects.iter().enumerate() {
        offsets.push(buf.len());
        buf.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, obj));
    }
    let xref_offset = buf.len();
    buf.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
    buf.push_str("0000000000 65535 f \n");
    for offset in &offsets {
        buf.push_str(&format!("{offset:010} 00000 n \n"));
    }
    buf.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF",
        objects.len() + 1,
        xref_offset
    ));
    buf.into_bytes()
}

// ── Scripted LLM mock ────────────────────────────────────────────────────────

/// Routes classification prompts to a fixed issuer reply and extraction
/// prompts to canned responses keyed by a marker the page text carries.
struct ScriptedProvider {
    issuer_reply: String,
    routes: Vec<(&'static str, Route)>,
}

enum Route {
    Reply(String),
    Fail,
}

impl ScriptedProvider {
    fn new(issuer_reply: &str) -> Self {
        Self {
            issuer_reply: issuer_reply.to_string(),
            routes: Vec::new(),
        }
    }

    fn page(mut self, marker: &'static str, reply: impl Into<String>) -> Self {
        self.routes.push((marker, Route::Reply(reply.into())));
        self
    }

    fn failing_page(mut self, marker: &'static str) -> Self {
        self.routes.push((marker, Route::Fail));
        self
    }
}

#[async_trait]
impl TextCompletion for ScriptedProvider {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        if prompt.contains("Identify the issuing bank") {
            return Ok(self.issuer_reply.clone());
        }
        for (marker, route) in &self.routes {
            if prompt.contains(marker) {
                return match route {
                    Route::Reply(reply) => Ok(reply.clone()),
                    Route::Fail => Err(CompletionError::Api {
                        status: 400,
                        body: "scripted failure".into(),
                    }),
                };
            }
        }
        Ok("[]".to_string())
    }

    fn model_tag(&self) -> &str {
        "scripted-mock"
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<SqliteStore>,
    ingestor: Ingestor,
}

fn harness(provider: ScriptedProvider, config: IngestConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(&dir.path().join("runs.db")).unwrap());
    let artifacts = ArtifactStore::new(dir.path().join("exports")).unwrap();
    let ingestor = Ingestor::new(Arc::new(provider), store.clone(), store.clone(), artifacts, config);
    Harness {
        _dir: dir,
        store,
        ingestor,
    }
}

fn fast_config() -> IngestConfig {
    IngestConfig::builder()
        .max_retries(0)
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

const HAPPY_ROWS: &str = r#"[
  {"date":"01/04/2024","description":"OPENING BALANCE","amount":0,"type":null,"running_balance":1000.00},
  {"date":"02/04/2024","description":"Salary","amount":500,"type":"credit","running_balance":1500.00},
  {"date":"03/04/2024","description":"Groceries","amount":120,"type":"debit","running_balance":1380.00}
]"#;

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_mixed_credit_debit() {
    let provider = ScriptedProvider::new("ICICI Bank").page("PAGEONE", HAPPY_ROWS);
    let h = harness(provider, fast_config());

    let pdf = statement_pdf(&["PAGEONE"]);
    let out = h.ingestor.ingest(&pdf, "statement.pdf").await.unwrap();

    assert_eq!(out.total_transactions, 3);
    assert_eq!(out.full_transactions.len(), 3);
    assert!(out.full_transactions.iter().all(|r| !r.balance_mismatch
        && !r.type_corrected
        && !r.invalid_structure));
    assert!(out.flags.is_empty());
    assert_eq!(out.issuer.as_deref(), Some("ICICI"));
    assert_eq!(out.transactions.len(), 3, "preview covers all rows when short");
    assert!(out.page_errors.is_empty());
    assert_eq!(out.stats.processed_pages, 1);
    assert_eq!(out.stats.admitted_rows, 3);

    // The artifact is already on disk with the canonical columns.
    let csv = h.ingestor.artifacts().read(&out.download_id).unwrap();
    assert!(csv.starts_with(
        "date,description,amount,type,running_balance,balance_mismatch,type_corrected,invalid_structure"
    ));
    assert!(csv.contains("02/04/2024,Salary,500,credit,1500,false,false,false"));

    // The run is persisted with the reconciled rows.
    let run = h.store.get_run(out.run_id.as_deref().unwrap()).await.unwrap();
    assert_eq!(run.rows, out.full_transactions);
    assert_eq!(run.model_tag, "scripted-mock");
    assert_eq!(run.user_accuracy_confirmed, None);
}

#[tokio::test]
async fn type_flip_is_repaired_end_to_end() {
    // The salary row arrives mis-tagged as a debit; the balance proves it in.
    let rows = r#"[
      {"date":"01/04/2024","description":"OPENING BALANCE","amount":0,"type":null,"running_balance":1000.00},
      {"date":"02/04/2024","description":"Salary","amount":500,"type":"debit","running_balance":1500.00},
      {"date":"03/04/2024","description":"Groceries","amount":120,"type":"debit","running_balance":1380.00}
    ]"#;
    let provider = ScriptedProvider::new("ICICI").page("PAGEONE", rows);
    let h = harness(provider, fast_config());

    let out = h
        .ingestor
        .ingest(&statement_pdf(&["PAGEONE"]), "s.pdf")
        .await
        .unwrap();

    let salary = &out.full_transactions[1];
    assert!(salary.type_corrected);
    assert!(!salary.balance_mismatch);
    assert_eq!(salary.txn_type, Some(TxnType::Credit));

    assert_eq!(out.flags.len(), 1);
    assert_eq!(out.flags[0].row_index, 1);
    assert!(out.flags[0].type_corrected);

    let csv = h.ingestor.artifacts().read(&out.download_id).unwrap();
    assert!(csv.contains("02/04/2024,Salary,500,credit,1500,false,true,false"));
}

#[tokio::test]
async fn unrepairable_mismatch_is_flagged_not_fatal() {
    let rows = r#"[
      {"date":"01/04/2024","description":"OPENING BALANCE","amount":0,"type":null,"running_balance":1000.00},
      {"date":"02/04/2024","description":"Salary","amount":500,"type":"credit","running_balance":1500.00},
      {"date":"03/04/2024","description":"Refund","amount":200,"type":"credit","running_balance":1600.00}
    ]"#;
    let provider = ScriptedProvider::new("unknown").page("PAGEONE", rows);
    let h = harness(provider, fast_config());

    let out = h
        .ingestor
        .ingest(&statement_pdf(&["PAGEONE"]), "s.pdf")
        .await
        .unwrap();

    assert_eq!(out.issuer, None, "'unknown' must not classify");
    assert!(out.full_transactions[2].balance_mismatch);
    assert!(!out.full_transactions[2].type_corrected);
    assert_eq!(out.flags.len(), 1);
    assert_eq!(out.flags[0].row_index, 2);
}

#[tokio::test]
async fn issuer_shaped_keys_normalize_with_commas_stripped() {
    // S5: aliased keys, string numbers with thousands separators.
    let rows = r#"[
      {"Transaction Date":"10/Apr/2024","Narration":"X","Debit":"1,500.50","Balance":"25,000.75"}
    ]"#;
    let provider = ScriptedProvider::new("HDFC Bank").page("PAGEONE", rows);
    let h = harness(provider, fast_config());

    let out = h
        .ingestor
        .ingest(&statement_pdf(&["PAGEONE"]), "s.pdf")
        .await
        .unwrap();

    assert_eq!(out.total_transactions, 1);
    let row = &out.full_transactions[0];
    assert_eq!(row.date, "10/Apr/2024");
    assert_eq!(row.description, "X");
    assert_eq!(row.amount, Some(1500.50));
    assert_eq!(row.txn_type, Some(TxnType::Debit));
    assert_eq!(row.running_balance, Some(25000.75));
}

#[tokio::test]
async fn fenced_response_and_transactions_object_are_accepted() {
    let fenced = format!("```json\n{{\"transactions\": {HAPPY_ROWS}}}\n```");
    let provider = ScriptedProvider::new("ICICI").page("PAGEONE", fenced);
    let h = harness(provider, fast_config());

    let out = h
        .ingestor
        .ingest(&statement_pdf(&["PAGEONE"]), "s.pdf")
        .await
        .unwrap();
    assert_eq!(out.total_transactions, 3);
    assert!(out.flags.is_empty());
}

#[tokio::test]
async fn pages_merge_in_document_order() {
    // Page 2's rows chain onto page 1's balances after the merge.
    let page_one = r#"[
      {"date":"01/04/2024","description":"OPENING BALANCE","amount":0,"type":null,"running_balance":1000.00},
      {"date":"02/04/2024","description":"Salary","amount":500,"type":"credit","running_balance":1500.00}
    ]"#;
    let page_two = r#"[
      {"date":"05/04/2024","description":"Rent","amount":700,"type":"debit","running_balance":800.00},
      {"date":"06/04/2024","description":"Interest","amount":2,"type":"credit","running_balance":802.00}
    ]"#;
    let provider = ScriptedProvider::new("ICICI")
        .page("PAGEONE", page_one)
        .page("PAGETWO", page_two);
    let h = harness(provider, fast_config());

    let out = h
        .ingestor
        .ingest(&statement_pdf(&["PAGEONE", "PAGETWO"]), "s.pdf")
        .await
        .unwrap();

    assert_eq!(out.total_transactions, 4);
    assert_eq!(out.full_transactions[2].description, "Rent");
    assert!(out.flags.is_empty(), "cross-page chaining must reconcile: {:?}", out.flags);
    assert_eq!(out.stats.total_pages, 2);
    assert_eq!(out.stats.processed_pages, 2);
}

#[tokio::test]
async fn failing_page_is_skipped_and_reported() {
    let provider = ScriptedProvider::new("ICICI")
        .page("PAGEONE", HAPPY_ROWS)
        .failing_page("PAGETWO");
    let h = harness(provider, fast_config());

    let out = h
        .ingestor
        .ingest(&statement_pdf(&["PAGEONE", "PAGETWO"]), "s.pdf")
        .await
        .unwrap();

    assert_eq!(out.total_transactions, 3, "page 1 rows survive");
    assert_eq!(out.page_errors.len(), 1);
    assert_eq!(out.stats.failed_pages, 1);
    assert_eq!(out.stats.processed_pages, 1);
}

#[tokio::test]
async fn unparseable_page_is_skipped_and_reported() {
    let provider = ScriptedProvider::new("ICICI")
        .page("PAGEONE", HAPPY_ROWS)
        .page("PAGETWO", "I could not find any transactions, sorry!");
    let h = harness(provider, fast_config());

    let out = h
        .ingestor
        .ingest(&statement_pdf(&["PAGEONE", "PAGETWO"]), "s.pdf")
        .await
        .unwrap();

    assert_eq!(out.total_transactions, 3);
    assert_eq!(out.page_errors.len(), 1);
    assert!(out.page_errors[0].to_string().contains("not parseable"));
}

#[tokio::test]
async fn no_rows_anywhere_is_a_fatal_error() {
    let provider = ScriptedProvider::new("ICICI").page("PAGEONE", "[]");
    let h = harness(provider, fast_config());

    let err = h
        .ingestor
        .ingest(&statement_pdf(&["PAGEONE"]), "s.pdf")
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NoTransactionsExtracted));
}

#[tokio::test]
async fn single_opening_balance_row_is_a_valid_run() {
    let rows = r#"[
      {"date":"01/04/2024","description":"OPENING BALANCE","amount":0,"type":null,"running_balance":1000.00}
    ]"#;
    let provider = ScriptedProvider::new("ICICI").page("PAGEONE", rows);
    let h = harness(provider, fast_config());

    let out = h
        .ingestor
        .ingest(&statement_pdf(&["PAGEONE"]), "s.pdf")
        .await
        .unwrap();
    assert_eq!(out.total_transactions, 1);
    assert!(out.flags.is_empty());
}

#[tokio::test]
async fn issuer_override_skips_classification() {
    let config = IngestConfig::builder()
        .max_retries(0)
        .issuer_override("SBI")
        .build()
        .unwrap();
    // The classifier reply would be ICICI; the override must win.
    let provider = ScriptedProvider::new("ICICI").page("PAGEONE", HAPPY_ROWS);
    let h = harness(provider, config);

    let out = h
        .ingestor
        .ingest(&statement_pdf(&["PAGEONE"]), "s.pdf")
        .await
        .unwrap();
    assert_eq!(out.issuer.as_deref(), Some("SBI"));
}

#[tokio::test]
async fn feedback_round_trip_scores_the_correction() {
    let provider = ScriptedProvider::new("ICICI").page("PAGEONE", HAPPY_ROWS);
    let h = harness(provider, fast_config());

    let out = h
        .ingestor
        .ingest(&statement_pdf(&["PAGEONE"]), "s.pdf")
        .await
        .unwrap();
    let run_id = out.run_id.clone().unwrap();

    let mut corrected: Vec<CanonicalRow> = out.full_transactions.clone();
    corrected[2].description = "Groceries Apr".into();

    let analysis = h.ingestor.submit_feedback(&run_id, &corrected).await.unwrap();
    assert_eq!(analysis.rows_modified, 1);
    assert_eq!(analysis.cell_changes.len(), 1);
    assert_eq!(analysis.cell_changes[0].row_index, 2);
    assert_eq!(analysis.cell_changes[0].field, "description");
    assert_eq!(analysis.cell_changes[0].old, "Groceries");
    assert_eq!(analysis.cell_changes[0].new, "Groceries Apr");
    assert_eq!(analysis.field_change_counts.get("description"), Some(&1));
}

#[tokio::test]
async fn accuracy_confirmation_round_trip() {
    let provider = ScriptedProvider::new("ICICI").page("PAGEONE", HAPPY_ROWS);
    let h = harness(provider, fast_config());

    let out = h
        .ingestor
        .ingest(&statement_pdf(&["PAGEONE"]), "s.pdf")
        .await
        .unwrap();
    let run_id = out.run_id.clone().unwrap();

    h.ingestor.confirm_accuracy(&run_id, true).await.unwrap();
    h.ingestor.confirm_accuracy(&run_id, true).await.unwrap();
    let run = h.store.get_run(&run_id).await.unwrap();
    assert_eq!(run.user_accuracy_confirmed, Some(true));

    let err = h.ingestor.confirm_accuracy("unknown-run", true).await.unwrap_err();
    assert!(matches!(err, IngestError::RunNotFound { .. }));
}

#[tokio::test]
async fn response_serializes_with_wire_field_names() {
    let provider = ScriptedProvider::new("ICICI").page("PAGEONE", HAPPY_ROWS);
    let h = harness(provider, fast_config());

    let out = h
        .ingestor
        .ingest(&statement_pdf(&["PAGEONE"]), "s.pdf")
        .await
        .unwrap();

    let json = serde_json::to_value(&out).unwrap();
    assert!(json.get("downloadId").is_some());
    assert!(json.get("runId").is_some());
    assert!(json.get("totalTransactions").is_some());
    assert_eq!(json["fullTransactions"].as_array().unwrap().len(), 3);
    assert_eq!(json["fullTransactions"][1]["type"], "credit");
}

#[tokio::test]
async fn generated_pdf_is_a_real_pdf() {
    // Sanity-check the in-test builder so failures above point at the
    // pipeline, not the fixture.
    let pdf = statement_pdf(&["PAGEONE", "PAGETWO"]);
    assert!(pdf.starts_with(b"%PDF"));

    let provider = ScriptedProvider::new("ICICI");
    let h = harness(provider, fast_config());
    // Both pages extract, find no transactions, and the run fails cleanly —
    // proving both pages were seen.
    let err = h.ingestor.ingest(&pdf, "s.pdf").await.unwrap_err();
    assert!(matches!(err, IngestError::NoTransactionsExtracted));
}
