//! Built-in prompts for statement extraction and issuer classification.
//!
//! No other file in the crate embeds prompt wording: these constants seed
//! the prompt store's default slot and supply the fixed classification
//! request, so changing the default extraction behaviour means editing this
//! file and nothing else, and the expansion logic can be asserted on in
//! unit tests with no LLM in the loop. Issuer-specific prompts are data
//! rather than code — they live in [`crate::store::PromptStore`].

/// Marker replaced with the page text when a prompt is expanded.
pub const TEXT_CONTENT_MARKER: &str = "${textContent}";

/// Default extraction prompt, used when no issuer-specific prompt is active.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are a bank-statement data extractor. The text of one statement page follows between the markers.

--- PAGE TEXT START ---
${textContent}
--- PAGE TEXT END ---

Extract every transaction line on this page as a JSON array of objects. For each transaction emit:

- "date": the transaction date exactly as printed
- "description": the narration / remarks text
- "amount": the transaction amount as a number (no currency symbols, no thousands separators)
- "type": "credit" if money came in, "debit" if money went out
- "running_balance": the balance after this transaction as a number

If the page shows an opening balance line, emit it as a row with "description": "OPENING BALANCE", "amount": 0, "type": null and the stated balance.

Rules:
- Output ONLY the JSON array. No commentary, no markdown fences.
- Preserve the order of transactions as they appear on the page.
- Skip page headers, footers, totals, and marketing text.
- If the page contains no transactions, output []."#;

/// Fixed prompt for issuer classification from page-1 text.
pub const CLASSIFY_PROMPT: &str = r#"The following text is the first page of a bank statement. Identify the issuing bank.

Reply with ONLY the bank's short name (for example: ICICI, HDFC, SBI, AXIS). If you cannot tell, reply with exactly: unknown

--- PAGE TEXT START ---
${textContent}
--- PAGE TEXT END ---"#;

/// Substitute every [`TEXT_CONTENT_MARKER`] in `template` with `page_text`.
///
/// No other interpolation is performed.
pub fn expand(template: &str, page_text: &str) -> String {
    template.replace(TEXT_CONTENT_MARKER, page_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_replaces_every_marker() {
        let t = "a ${textContent} b ${textContent}";
        assert_eq!(expand(t, "X"), "a X b X");
    }

    #[test]
    fn expand_is_identity_without_marker() {
        assert_eq!(expand("no marker here", "X"), "no marker here");
    }

    #[test]
    fn default_prompt_carries_marker() {
        assert!(DEFAULT_EXTRACTION_PROMPT.contains(TEXT_CONTENT_MARKER));
        assert!(CLASSIFY_PROMPT.contains(TEXT_CONTENT_MARKER));
    }
}
