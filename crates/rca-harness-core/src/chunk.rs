//! Overlapping-window text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `window_tokens`
//! (approximated as bytes / [`CHARS_PER_TOKEN`]), each starting
//! `overlap_tokens` before the end of its predecessor. Window ends prefer a
//! paragraph break, then a line break, then a space, falling back to a hard
//! cut on a UTF-8 boundary.
//!
//! The output is a pure function of `(text, window_tokens, overlap_tokens)`:
//! chunk indices are contiguous from 0, windows cover the text with no gaps,
//! and concatenating [`Chunk::novel_text`] over all chunks yields the input.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate bytes-per-token ratio used for window sizing and budgets.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Split `text` into overlapping windows.
///
/// Returns no chunks for empty text. `overlap_tokens` must be smaller than
/// `window_tokens`; larger values are clamped to `window_tokens - 1`.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    window_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let window_tokens = window_tokens.max(1);
    let overlap_tokens = overlap_tokens.min(window_tokens - 1);
    let max_bytes = window_tokens * CHARS_PER_TOKEN;
    let overlap_bytes = overlap_tokens * CHARS_PER_TOKEN;
    // Soft breaks are only accepted past this point so every window makes
    // progress beyond the overlap and windows don't collapse to slivers.
    let min_span = (overlap_bytes + 1).max(max_bytes / 2);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut prev_end = 0usize;
    let mut index: u32 = 0;

    loop {
        // Every window must extend past the previous one by at least a char.
        let covered = start.max(prev_end);
        let mut hard_end = floor_boundary(text, (start + max_bytes).min(text.len()));
        if hard_end <= covered {
            hard_end = ceil_boundary(text, covered + 1);
        }

        let end = if hard_end == text.len() {
            hard_end
        } else {
            let from = (start + min_span).max(covered + 1);
            soft_break(text, from, hard_end).unwrap_or(hard_end)
        };

        let overlap = prev_end.saturating_sub(start);
        chunks.push(make_chunk(document_id, index, &text[start..end], overlap));

        if end == text.len() {
            break;
        }

        let mut next = floor_boundary(text, end.saturating_sub(overlap_bytes));
        if next <= start {
            next = end;
        }
        prev_end = end;
        start = next;
        index += 1;
    }

    chunks
}

/// Find the last preferred break in `text[from..to]`, returning the offset
/// just past it.
fn soft_break(text: &str, from: usize, to: usize) -> Option<usize> {
    if from >= to {
        return None;
    }
    let from = ceil_boundary(text, from);
    if from >= to {
        return None;
    }
    let region = &text[from..to];
    region
        .rfind("\n\n")
        .map(|pos| pos + 2)
        .or_else(|| region.rfind('\n').map(|pos| pos + 1))
        .or_else(|| region.rfind(' ').map(|pos| pos + 1))
        .map(|pos| from + pos)
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn make_chunk(document_id: &str, index: u32, text: &str, overlap: usize) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        overlap,
        token_count: estimate_tokens(text),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.novel_text()).collect()
    }

    fn incident_report() -> String {
        (0..40)
            .map(|i| {
                format!(
                    "Incident step {}: the payment gateway returned 502 while the connection pool was saturated.",
                    i
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_text("doc1", "", 800, 150).is_empty());
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 800, 150);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].overlap, 0);
    }

    #[test]
    fn indices_contiguous_and_windows_bounded() {
        let text = incident_report();
        let chunks = chunk_text("doc1", &text, 50, 10);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as u32);
            assert!(c.text.len() <= 50 * CHARS_PER_TOKEN);
        }
    }

    #[test]
    fn reconstructs_original_text() {
        let text = incident_report();
        let chunks = chunk_text("doc1", &text, 50, 10);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn adjacent_chunks_overlap() {
        let text = incident_report();
        let chunks = chunk_text("doc1", &text, 50, 10);
        assert_eq!(chunks[0].overlap, 0);
        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert!(next.overlap > 0);
            assert!(prev.text.ends_with(&next.text[..next.overlap]));
        }
    }

    #[test]
    fn zero_overlap_partitions_text() {
        let text = incident_report();
        let chunks = chunk_text("doc1", &text, 40, 0);
        assert!(chunks.iter().all(|c| c.overlap == 0));
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn deterministic() {
        let text = incident_report();
        let c1 = chunk_text("doc1", &text, 30, 8);
        let c2 = chunk_text("doc1", &text, 30, 8);
        assert_eq!(c1, c2);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "Ошибка базы данных: таймаут соединения. ".repeat(30);
        let chunks = chunk_text("doc1", &text, 10, 3);
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn unbroken_text_uses_hard_cuts() {
        let text = "x".repeat(1000);
        let chunks = chunk_text("doc1", &text, 25, 5);
        assert_eq!(chunks[0].text.len(), 100);
        assert_eq!(chunks[1].overlap, 20);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn overlap_is_clamped_below_window() {
        let text = "word ".repeat(200);
        let chunks = chunk_text("doc1", &text, 5, 50);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn last_chunk_may_be_short() {
        let text = "a".repeat(250);
        let chunks = chunk_text("doc1", &text, 25, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].text.len(), 50);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
