//! Common utilities and helper functions
//!
//! This module provides shared text helpers used by the extractors and the
//! aggregator, plus the retry helpers in [`retry`].

pub mod retry;

use regex::Regex;
use std::sync::OnceLock;

/// Normalize whitespace in text
pub fn normalize_whitespace(text: &str) -> String {
    static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

    let re = WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("Invalid regex pattern"));

    re.replace_all(text.trim(), " ").to_string()
}

/// Text window of roughly `window` characters on each side of `start..end`
///
/// Offsets are byte offsets into `text`; the window is widened or narrowed to
/// the nearest char boundaries and whitespace is normalized.
pub fn snippet(text: &str, start: usize, end: usize, window: usize) -> String {
    let end = end.min(text.len());
    let start = start.min(end);

    let mut from = start;
    let mut taken = 0;
    for (idx, _) in text[..start].char_indices().rev() {
        if taken == window {
            break;
        }
        from = idx;
        taken += 1;
    }

    let mut to = end;
    for (taken, (idx, ch)) in text[end..].char_indices().enumerate() {
        if taken == window {
            break;
        }
        to = end + idx + ch.len_utf8();
    }

    normalize_whitespace(&text[from..to])
}

/// Truncate text to at most `max_chars` characters
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
