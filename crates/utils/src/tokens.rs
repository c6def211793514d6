/// Estimates token count for a piece of text when no real tokenizer is
/// available: `ceil(characters / 4) + 100` (fixed overhead for
/// role/delimiter tokens in a chat-style prompt).
pub fn estimate_tokens(text: &str) -> i32 {
    let chars = text.chars().count() as i32;
    let ceil_div4 = (chars + 3) / 4;
    ceil_div4 + 100
}

/// Truncates `text` to at most `budget_tokens` (by the same estimate),
/// cutting at the last paragraph boundary (`\n\n`) before the limit so the
/// cut doesn't land mid-sentence.
pub fn truncate_to_token_budget(text: &str, budget_tokens: i32) -> String {
    if estimate_tokens(text) <= budget_tokens {
        return text.to_string();
    }
    let budget_chars = ((budget_tokens - 100).max(0) * 4) as usize;
    // budget_chars counts characters, not bytes, so the cut point has to be
    // found via char_indices rather than sliced directly — a raw byte index
    // derived from a char count can land mid-character for non-ASCII text.
    let cut_byte = text
        .char_indices()
        .nth(budget_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    if cut_byte >= text.len() {
        return text.to_string();
    }
    let window = &text[..cut_byte];
    match window.rfind("\n\n") {
        Some(idx) if idx > 0 => window[..idx].to_string(),
        _ => window.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_matches_formula() {
        assert_eq!(estimate_tokens(""), 100);
        assert_eq!(estimate_tokens("abcd"), 101);
        assert_eq!(estimate_tokens("abcde"), 102);
    }

    #[test]
    fn truncate_cuts_at_paragraph_boundary() {
        let text = "first paragraph of words here\n\nsecond paragraph that pushes well past budget entirely with lots more text to spare and spare and spare";
        let truncated = truncate_to_token_budget(text, 110);
        assert!(truncated.len() < text.len());
        assert!(!truncated.contains("second paragraph"));
    }

    #[test]
    fn truncate_is_noop_under_budget() {
        let text = "short text";
        assert_eq!(truncate_to_token_budget(text, 10_000), text);
    }

    #[test]
    fn truncate_does_not_panic_on_multibyte_boundary() {
        let text = "caf\u{e9} ".repeat(200) + "\u{1f600}".repeat(200).as_str();
        let truncated = truncate_to_token_budget(&text, 110);
        assert!(truncated.len() < text.len());
    }
}
