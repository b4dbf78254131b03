//! Per-page LLM extraction: prompt in, raw rows out.
//!
//! One call to [`extract_page`] owns the complete lifecycle of a single
//! page: submit the expanded prompt, wait out the per-call deadline, decide
//! whether a failure deserves another attempt, and turn the reply into
//! [`RawRow`]s. What the prompt *says* is none of this module's business —
//! that belongs to [`crate::prompts`] and the prompt store.
//!
//! Not every failure is retried. Under a concurrent fan-out the LLM API
//! will happily hand back 429s and 5xxs that succeed moments later, so
//! transport-class errors get up to `max_retries` more attempts, each
//! waiting twice as long as the last (`retry_backoff_ms`, then doubled per
//! attempt) so the workers don't all hammer a recovering endpoint in
//! lockstep. A reply that *arrived* but isn't a row array is a different
//! animal: asking again usually buys the same prose at full token price,
//! and the orchestrator recovers by skipping the page anyway, so parse and
//! shape failures are terminal on the first attempt. Authentication and
//! other non-retryable API errors likewise stop the loop immediately.

use crate::config::IngestConfig;
use crate::error::PageError;
use crate::llm::TextCompletion;
use crate::output::PageExtraction;
use crate::transaction::{RawRow, RowValue};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Run one page's expanded prompt through the LLM and parse the reply.
///
/// The return value is always a [`PageExtraction`]; failures are recorded
/// in its `error` field rather than bubbled up, which is what lets the
/// orchestrator drop a bad page and keep the run alive.
pub async fn extract_page(
    provider: &Arc<dyn TextCompletion>,
    page_num: usize,
    prompt: &str,
    config: &IngestConfig,
) -> PageExtraction {
    let start = Instant::now();
    let mut last_err: Option<String> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let call = timeout(
            Duration::from_secs(config.api_timeout_secs),
            provider.complete(prompt),
        );

        match call.await {
            Ok(Ok(response)) => {
                let duration = start.elapsed();
                debug!(
                    "Page {}: {} chars of response, {:?}",
                    page_num,
                    response.len(),
                    duration
                );
                return match parse_rows(page_num, &response) {
                    Ok(rows) => PageExtraction {
                        page_num,
                        rows,
                        retries: attempt as u8,
                        duration_ms: duration.as_millis() as u64,
                        error: None,
                    },
                    Err(e) => failed(page_num, attempt as u8, start, e),
                };
            }
            Ok(Err(e)) if e.is_retryable() => {
                warn!("Page {}: attempt {} failed — {}", page_num, attempt + 1, e);
                last_err = Some(e.to_string());
            }
            Ok(Err(e)) => {
                // Non-retryable API error: stop burning attempts.
                return failed(
                    page_num,
                    attempt as u8,
                    start,
                    PageError::LlmFailed {
                        page: page_num,
                        retries: attempt as u8,
                        detail: e.to_string(),
                    },
                );
            }
            Err(_) => {
                return failed(
                    page_num,
                    attempt as u8,
                    start,
                    PageError::Timeout {
                        page: page_num,
                        secs: config.api_timeout_secs,
                    },
                );
            }
        }
    }

    let detail = last_err.unwrap_or_else(|| "unknown error".to_string());
    failed(
        page_num,
        config.max_retries as u8,
        start,
        PageError::LlmFailed {
            page: page_num,
            retries: config.max_retries as u8,
            detail,
        },
    )
}

fn failed(page_num: usize, retries: u8, start: Instant, error: PageError) -> PageExtraction {
    PageExtraction {
        page_num,
        rows: Vec::new(),
        retries,
        duration_ms: start.elapsed().as_millis() as u64,
        error: Some(error),
    }
}

// ── Response parsing ─────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n?(.*?)\n?```\s*$").unwrap());

/// Strip a single outer ```` ```json … ``` ```` fence, if present.
///
/// Models sometimes disobey the "no fences" instruction; stripping here
/// keeps the prompt focused on what to extract.
pub fn strip_json_fences(input: &str) -> &str {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(input),
        None => input.trim(),
    }
}

/// Parse an LLM reply into raw rows.
///
/// Accepts either a top-level JSON array or an object with a `transactions`
/// array. Array elements that are not objects are skipped with a warning —
/// page-local errors are reserved for responses with nothing usable in them.
pub fn parse_rows(page_num: usize, response: &str) -> Result<Vec<RawRow>, PageError> {
    let body = strip_json_fences(response);

    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| PageError::Unparseable {
            page: page_num,
            detail: e.to_string(),
        })?;

    let items = match &value {
        serde_json::Value::Array(items) => items.as_slice(),
        serde_json::Value::Object(map) => match map.get("transactions") {
            Some(serde_json::Value::Array(items)) => items.as_slice(),
            Some(other) => {
                return Err(PageError::ShapeInvalid {
                    page: page_num,
                    detail: format!("'transactions' is {}, expected array", json_kind(other)),
                })
            }
            None => {
                return Err(PageError::ShapeInvalid {
                    page: page_num,
                    detail: "object without a 'transactions' key".into(),
                })
            }
        },
        other => {
            return Err(PageError::ShapeInvalid {
                page: page_num,
                detail: format!("top-level {}, expected array or object", json_kind(other)),
            })
        }
    };

    let mut rows = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match item {
            serde_json::Value::Object(map) => {
                let row: RawRow = map
                    .iter()
                    .map(|(k, v)| (k.clone(), RowValue::from_json(v)))
                    .collect();
                rows.push(row);
            }
            other => {
                warn!(
                    "Page {}: skipping element {} — {} instead of object",
                    page_num,
                    i,
                    json_kind(other)
                );
            }
        }
    }
    Ok(rows)
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
