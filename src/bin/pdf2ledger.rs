//! Command-line front end for pdf2ledger.
//!
//! All real work happens in the library; this binary wires flags and
//! environment variables into an [`Ingestor`], drives one subcommand, and
//! formats what comes back.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pdf2ledger::{
    ArtifactStore, CanonicalRow, HttpTextCompletion, IngestConfig, Ingestor, RunStore,
    SqliteStore, TextCompletion,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ingest a statement (CSV artifact lands in ./exports)
  pdf2ledger ingest statement.pdf

  # Pin the issuer and use a tighter balance tolerance
  pdf2ledger ingest --issuer ICICI --tolerance 0.05 statement.pdf

  # Full JSON response (preview, flags, stats)
  pdf2ledger ingest --json statement.pdf > run.json

  # Confirm a run's accuracy
  pdf2ledger confirm 4f7c…-run-id --accurate true

  # Submit corrected rows and print the diff analysis
  pdf2ledger feedback 4f7c…-run-id --corrected fixed_rows.json

ENVIRONMENT VARIABLES:
  PDF2LEDGER_API_KEY    LLM API key (falls back to OPENAI_API_KEY)
  PDF2LEDGER_MODEL      Model id (default: gpt-4.1-mini)
  PDF2LEDGER_BASE_URL   OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, …)

SETUP:
  1. Set API key:  export PDF2LEDGER_API_KEY=sk-...
  2. Ingest:       pdf2ledger ingest statement.pdf
"#;

/// Convert bank-statement PDFs into a reconciled transaction ledger.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2ledger",
    version,
    about = "Convert bank-statement PDFs into a reconciled transaction ledger",
    arg_required_else_help = true,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database holding runs, feedback, and prompts.
    #[arg(long, env = "PDF2LEDGER_DB", default_value = "pdf2ledger.db", global = true)]
    db: PathBuf,

    /// Directory for CSV artifacts.
    #[arg(long, env = "PDF2LEDGER_EXPORTS", default_value = "exports", global = true)]
    exports: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2LEDGER_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors and the requested result.
    #[arg(short, long, env = "PDF2LEDGER_QUIET", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a statement PDF and emit the reconciled ledger.
    Ingest {
        /// Path to the statement PDF.
        input: PathBuf,

        /// LLM model id.
        #[arg(long, env = "PDF2LEDGER_MODEL")]
        model: Option<String>,

        /// OpenAI-compatible endpoint base URL.
        #[arg(long, env = "PDF2LEDGER_BASE_URL")]
        base_url: Option<String>,

        /// Skip classification and use this issuer tag.
        #[arg(long)]
        issuer: Option<String>,

        /// Concurrent per-page LLM calls.
        #[arg(short, long, default_value_t = 4)]
        concurrency: usize,

        /// Balance-equality tolerance.
        #[arg(long, default_value_t = pdf2ledger::DEFAULT_BALANCE_TOLERANCE)]
        tolerance: f64,

        /// Per-page LLM call timeout in seconds.
        #[arg(long, default_value_t = 60)]
        api_timeout: u64,

        /// Whole-pipeline timeout in seconds.
        #[arg(long, default_value_t = 300)]
        pipeline_timeout: u64,

        /// Print the full JSON response instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Record whether a run's extraction was accurate.
    Confirm {
        /// Run id returned by `ingest`.
        run_id: String,

        /// true when the extraction was accurate.
        #[arg(long, action = clap::ArgAction::Set)]
        accurate: bool,
    },

    /// Submit corrected rows for a run and print the diff analysis.
    Feedback {
        /// Run id returned by `ingest`.
        run_id: String,

        /// JSON file containing the corrected row array.
        #[arg(long)]
        corrected: PathBuf,

        /// Print the full analysis as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let store = Arc::new(SqliteStore::open(&cli.db).context("Failed to open the run database")?);
    let artifacts =
        ArtifactStore::new(&cli.exports).context("Failed to open the export directory")?;

    match cli.command {
        Command::Ingest {
            input,
            model,
            base_url,
            issuer,
            concurrency,
            tolerance,
            api_timeout,
            pipeline_timeout,
            json,
        } => {
            let provider = build_provider(model, base_url)?;

            let mut builder = IngestConfig::builder()
                .concurrency(concurrency)
                .balance_tolerance(tolerance)
                .api_timeout_secs(api_timeout)
                .pipeline_timeout_secs(pipeline_timeout);
            if let Some(tag) = issuer {
                builder = builder.issuer_override(tag);
            }
            let config = builder.build().context("Invalid configuration")?;

            let ingestor = Ingestor::new(provider, store.clone(), store, artifacts, config);
            let output = ingestor
                .ingest_file(&input)
                .await
                .with_context(|| format!("Ingestion failed for {}", input.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                let csv_path = ingestor.artifacts().dir().join(&output.download_id);
                println!("{}", output.message);
                println!("  ledger:  {}", csv_path.display());
                match &output.run_id {
                    Some(id) => println!("  run id:  {id}"),
                    None => println!("  run id:  (persistence failed — artifact still written)"),
                }
                if let Some(issuer) = &output.issuer {
                    println!("  issuer:  {issuer}");
                }
                if !output.flags.is_empty() {
                    println!("  flagged rows:");
                    for flag in &output.flags {
                        let mut kinds = Vec::new();
                        if flag.invalid_structure {
                            kinds.push("invalid structure");
                        }
                        if flag.balance_mismatch {
                            kinds.push("balance mismatch");
                        }
                        if flag.type_corrected {
                            kinds.push("type corrected");
                        }
                        println!("    row {:>3}: {}", flag.row_index, kinds.join(", "));
                    }
                }
                if !output.page_errors.is_empty() {
                    eprintln!("  {} page(s) skipped:", output.page_errors.len());
                    for err in &output.page_errors {
                        eprintln!("    {err}");
                    }
                }
            }
        }

        Command::Confirm { run_id, accurate } => {
            store
                .confirm_accuracy(&run_id, accurate)
                .await
                .with_context(|| format!("Failed to confirm run {run_id}"))?;
            if !cli.quiet {
                println!("run {run_id}: accuracy = {accurate}");
            }
        }

        Command::Feedback {
            run_id,
            corrected,
            json,
        } => {
            let raw = tokio::fs::read_to_string(&corrected)
                .await
                .with_context(|| format!("Failed to read {}", corrected.display()))?;
            let rows: Vec<CanonicalRow> =
                serde_json::from_str(&raw).context("Corrected rows are not a valid row array")?;

            let record = store
                .submit_feedback(&run_id, &rows)
                .await
                .with_context(|| format!("Failed to submit feedback for run {run_id}"))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&record.analysis)?);
            } else {
                let a = &record.analysis;
                println!(
                    "feedback {}: {} modified, {} added, {} deleted, {} cell change(s)",
                    record.id,
                    a.rows_modified,
                    a.rows_added,
                    a.rows_deleted,
                    a.cell_changes.len()
                );
                for (field, count) in &a.field_change_counts {
                    println!("    {field}: {count}");
                }
            }
        }
    }

    io::stdout().flush().ok();
    Ok(())
}

/// Build the LLM provider from the environment, with CLI overrides.
fn build_provider(
    model: Option<String>,
    base_url: Option<String>,
) -> Result<Arc<dyn TextCompletion>> {
    let api_key = std::env::var("PDF2LEDGER_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .ok()
        .filter(|k| !k.is_empty());
    let Some(api_key) = api_key else {
        bail!(
            "No LLM API key configured.\n\
             Set PDF2LEDGER_API_KEY (or OPENAI_API_KEY) and retry."
        );
    };

    let model = model.unwrap_or_else(|| pdf2ledger::llm::DEFAULT_MODEL.to_string());
    let mut provider = HttpTextCompletion::new(api_key, model);
    if let Some(url) = base_url.filter(|u| !u.is_empty()) {
        provider = provider.with_base_url(url);
    }
    Ok(Arc::new(provider))
}
