//! Issuer classification: name the bank from page-1 text.
//!
//! Classification is advisory. Its only effect is which extraction prompt
//! the prompt store resolves; a wrong or missing tag degrades to the default
//! prompt, so every failure path here collapses to `None` rather than
//! surfacing an error.

use crate::llm::TextCompletion;
use crate::prompts::{self, CLASSIFY_PROMPT};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Page-1 text beyond this length adds cost without adding signal: the
/// letterhead and account header sit at the top.
const CLASSIFY_INPUT_LIMIT: usize = 2_000;

/// Responses longer than this are prose, not a bank name.
const MAX_TAG_LEN: usize = 50;

/// Substring → canonical tag. Models tend to answer with full legal names
/// ("ICICI Bank Limited"); this folds the common variants onto short tags.
const CANONICAL_TAGS: &[(&str, &str)] = &[
    ("ICICI", "ICICI"),
    ("HDFC", "HDFC"),
    ("STATE BANK", "SBI"),
    ("SBI", "SBI"),
    ("AXIS", "AXIS"),
    ("KOTAK", "KOTAK"),
];

/// Ask the LLM which bank issued the statement.
///
/// Returns `None` on any transport failure, timeout, or unusable response.
pub async fn classify_issuer(
    provider: &Arc<dyn TextCompletion>,
    first_page: &str,
    timeout_secs: u64,
) -> Option<String> {
    let excerpt = truncate_chars(first_page, CLASSIFY_INPUT_LIMIT);
    let prompt = prompts::expand(CLASSIFY_PROMPT, &excerpt);

    let response = match timeout(Duration::from_secs(timeout_secs), provider.complete(&prompt)).await
    {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!("issuer classification failed: {e}");
            return None;
        }
        Err(_) => {
            warn!("issuer classification timed out after {timeout_secs}s");
            return None;
        }
    };

    let tag = canonicalize(&response);
    debug!(?tag, "issuer classification");
    tag
}

/// Apply the acceptance gates and the canonicalization table to a raw reply.
pub fn canonicalize(response: &str) -> Option<String> {
    let line = response.lines().next().unwrap_or("").trim();
    if line.is_empty() || line.len() > MAX_TAG_LEN || line.eq_ignore_ascii_case("unknown") {
        return None;
    }

    let upper = line.to_uppercase();
    for (needle, tag) in CANONICAL_TAGS {
        if upper.contains(needle) {
            return Some((*tag).to_string());
        }
    }
    Some(upper)
}

fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_folds_known_issuers() {
        assert_eq!(canonicalize("ICICI Bank Limited"), Some("ICICI".into()));
        assert_eq!(canonicalize("hdfc bank"), Some("HDFC".into()));
        assert_eq!(canonicalize("State Bank of India"), Some("SBI".into()));
        assert_eq!(canonicalize("Axis"), Some("AXIS".into()));
    }

    #[test]
    fn canonicalize_uppercases_unlisted_issuers() {
        assert_eq!(canonicalize("Monzo"), Some("MONZO".into()));
    }

    #[test]
    fn canonicalize_rejects_unknown_and_empty() {
        assert_eq!(canonicalize("unknown"), None);
        assert_eq!(canonicalize("UNKNOWN"), None);
        assert_eq!(canonicalize(""), None);
        assert_eq!(canonicalize("   \n"), None);
    }

    #[test]
    fn canonicalize_rejects_prose() {
        let prose = "The statement appears to be issued by a bank whose name I cannot determine";
        assert_eq!(canonicalize(prose), None);
    }

    #[test]
    fn canonicalize_uses_first_line_only() {
        assert_eq!(canonicalize("ICICI\nsome extra reasoning"), Some("ICICI".into()));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        // Multi-byte input must not panic on a byte-boundary slice.
        let s = "é".repeat(3000);
        assert_eq!(truncate_chars(&s, 2000).chars().count(), 2000);
    }
}
