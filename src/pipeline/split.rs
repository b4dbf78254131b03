//! Page splitting: turn a PDF byte buffer into ordered per-page text.
//!
//! Parsing a statement PDF is pure CPU work that can run for hundreds of
//! milliseconds — an eternity to hold up a tokio worker that should be
//! driving LLM calls — so the parse happens on the blocking pool and the
//! async side only awaits its result.
//!
//! ## Ordering contract
//!
//! Downstream reconciliation relies on chronological row order, which
//! mirrors physical page order for every bank in scope. The extraction
//! backend walks pages in document order and joins items that share a
//! vertical position with spaces, emitting a newline on each
//! y-coordinate change — so within-page text is already in reading order.
//! Empty pages yield an empty string at their ordinal position, never a
//! missing element.

use crate::error::IngestError;
use tracing::debug;

/// Split a PDF byte buffer into one text string per page.
///
/// # Errors
/// [`IngestError::MalformedSource`] when the buffer does not start with the
/// PDF magic or the document cannot be parsed.
pub async fn split_pages(bytes: &[u8]) -> Result<Vec<String>, IngestError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(IngestError::MalformedSource {
            detail: "missing %PDF header".into(),
        });
    }

    let buffer = bytes.to_vec();
    // The extraction backend aborts on some malformed inputs instead of
    // returning an error; a panicked parse is still a malformed source.
    let pages = match tokio::task::spawn_blocking(move || split_pages_blocking(&buffer)).await {
        Ok(result) => result?,
        Err(e) if e.is_panic() => {
            return Err(IngestError::MalformedSource {
                detail: "parser aborted on this document".into(),
            })
        }
        Err(e) => return Err(IngestError::Internal(format!("split task failed: {e}"))),
    };

    debug!(
        pages = pages.len(),
        empty = pages.iter().filter(|p| p.trim().is_empty()).count(),
        "split PDF into pages"
    );
    Ok(pages)
}

/// Blocking implementation of page splitting.
fn split_pages_blocking(bytes: &[u8]) -> Result<Vec<String>, IngestError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| IngestError::MalformedSource {
        detail: e.to_string(),
    })
}

/// Whether any page carries non-whitespace text.
pub fn has_any_text(pages: &[String]) -> bool {
    pages.iter().any(|p| !p.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_pdf_bytes() {
        let err = split_pages(b"hello world").await.unwrap_err();
        assert!(matches!(err, IngestError::MalformedSource { .. }));
    }

    #[tokio::test]
    async fn rejects_truncated_magic() {
        let err = split_pages(b"%P").await.unwrap_err();
        assert!(matches!(err, IngestError::MalformedSource { .. }));
    }

    #[tokio::test]
    async fn rejects_corrupt_body_with_valid_magic() {
        // Valid magic, garbage body: the parser must fail, not panic.
        let err = split_pages(b"%PDF-1.7 garbage garbage").await.unwrap_err();
        assert!(matches!(err, IngestError::MalformedSource { .. }));
    }

    #[test]
    fn has_any_text_ignores_whitespace_pages() {
        assert!(!has_any_text(&[]));
        assert!(!has_any_text(&["".into(), "  \n\t".into()]));
        assert!(has_any_text(&["".into(), "OPENING BALANCE".into()]));
    }
}
