//! Truncation Utilities
//!
//! Text shortening that respects UTF-8 boundaries.

/// At most `max_chars` characters of `content`, with an ellipsis when cut.
pub fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

/// The first `n` whitespace-delimited words, joined by single spaces.
pub fn first_words(content: &str, n: usize) -> String {
    content.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}
