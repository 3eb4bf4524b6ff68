const ELLIPSIS: &str = "...";

/// Shortens `text` to at most `limit` characters, cutting at a word boundary.
///
/// Returns the input unchanged (trimmed) when it already fits. Otherwise the
/// text is cut at the last whitespace that leaves room for a trailing `...`;
/// a single word longer than the limit is hard-cut. Counts `char`s, not bytes,
/// so multi-byte text never splits inside a code point.
#[must_use]
pub fn truncate_at_word_boundary(text: &str, limit: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= limit {
        return text.to_owned();
    }
    if limit <= ELLIPSIS.len() {
        return text.chars().take(limit).collect();
    }

    let budget = limit - ELLIPSIS.len();
    let head: String = text.chars().take(budget + 1).collect();
    // `head` holds one extra char so a word ending exactly at the budget is kept.
    let cut = head
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .map(|(i, _)| i)
        .last();

    let kept = match cut {
        Some(idx) if idx > 0 => head[..idx].trim_end().to_owned(),
        _ => text.chars().take(budget).collect(),
    };
    format!("{kept}{ELLIPSIS}")
}
