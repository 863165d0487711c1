//! Repetition Detector
//!
//! Flags degenerate generations where a multi-word phrase keeps recurring.
//! Stateless: every call rescans the whole text, so it is safe to run on a
//! growing prefix as often as the caller likes.

use std::collections::HashMap;

/// Texts shorter than this many characters are never flagged.
pub const MIN_CHARS: usize = 40;
/// Texts with fewer words than this are never flagged.
pub const MIN_WORDS: usize = 24;
/// Longest phrase checked first; longer repeats are the stronger signal.
pub const MAX_PHRASE_WORDS: usize = 8;
pub const MIN_PHRASE_WORDS: usize = 4;
/// A phrase seen this many times marks the text as a loop.
pub const REPEAT_THRESHOLD: usize = 3;

/// Returns true when some 4..=8 word phrase occurs at least three times.
pub fn is_repetitive(text: &str) -> bool {
    if text.chars().count() < MIN_CHARS {
        return false;
    }

    let words: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
    if words.len() < MIN_WORDS {
        return false;
    }

    (MIN_PHRASE_WORDS..=MAX_PHRASE_WORDS)
        .rev()
        .any(|len| has_repeated_window(&words, len))
}

fn has_repeated_window(words: &[String], len: usize) -> bool {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for window in words.windows(len) {
        let count = counts.entry(window.join(" ")).or_insert(0);
        *count += 1;
        if *count >= REPEAT_THRESHOLD {
            return true;
        }
    }
    false
}
