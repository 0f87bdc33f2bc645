//! Length-bounded text helpers shared by title and aspect handling.
//!
//! Limits are counted in characters, not bytes.

/// Destination title limit.
pub const TITLE_LIMIT: usize = 80;

/// Platform limit for a single item-aspect value.
pub const ASPECT_VALUE_LIMIT: usize = 65;

const PHRASE_BREAKS: [&str; 4] = [". ", ": ", "; ", ", "];

/// Truncates at the last whitespace at or before `limit`.
///
/// Only cuts mid-word when the first `limit` characters contain no whitespace.
pub fn truncate_at_word(text: &str, limit: usize) -> String {
    let text = text.trim();
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit {
        return text.to_string();
    }
    // A space at index `limit` means the first `limit` chars end on a word.
    let window = &chars[..=limit];
    match window.iter().rposition(|c| c.is_whitespace()) {
        Some(pos) if pos > 0 => window[..pos]
            .iter()
            .collect::<String>()
            .trim_end()
            .to_string(),
        _ => chars[..limit].iter().collect(),
    }
}

/// Truncates preferring sentence and phrase boundaries, then words, then a hard cut.
pub fn truncate_at_phrase(text: &str, limit: usize) -> String {
    let text = text.trim();
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit {
        return text.to_string();
    }
    let window: String = chars[..=limit].iter().collect();
    let min_keep = limit / 2;
    for sep in PHRASE_BREAKS {
        let Some(idx) = window.rfind(sep) else {
            continue;
        };
        let keep_end = if sep == ". " { idx + 1 } else { idx };
        let candidate = window[..keep_end].trim_end();
        let kept = candidate.chars().count();
        if kept >= min_keep && kept <= limit {
            return candidate.to_string();
        }
    }
    truncate_at_word(text, limit)
}

/// Takes at most `limit` characters without regard to boundaries.
pub fn take_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
