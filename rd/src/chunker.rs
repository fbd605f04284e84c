//! Response chunking
//!
//! Splits long responses into pieces no longer than the transport's message
//! limit, preferring paragraph breaks, then line breaks, then spaces, and only
//! cutting mid-word when nothing else fits. Lengths are in characters.

/// Default per-message limit, below common chat transports' 4096 cap
pub const DEFAULT_LIMIT: usize = 4000;

/// Boundaries tried in order of preference
const BOUNDARIES: [&str; 3] = ["\n\n", "\n", " "];

/// Split `text` into chunks of at most `limit` characters
///
/// Leading whitespace of the text and of every chunk is dropped.
pub fn split(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let text = text.trim_start();
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while remaining.chars().count() > limit {
        let cut = split_point(remaining, limit);
        chunks.push(remaining[..cut].to_string());
        remaining = remaining[cut..].trim_start();
    }
    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}

/// Byte offset to cut at: the last boundary starting at or before `limit`
/// characters, or exactly `limit` characters when there is none
fn split_point(s: &str, limit: usize) -> usize {
    for boundary in BOUNDARIES {
        let window = &s[..byte_offset(s, limit + boundary.chars().count())];
        if let Some(idx) = window.rfind(boundary)
            && idx > 0
        {
            return idx;
        }
    }
    byte_offset(s, limit)
}

/// Byte offset of the `chars`-th character, or the string length
fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(s.len())
}
