//! Overlapping, separator-aware text chunker.
//!
//! Splits a file's text into windows of at most `chunk_size` characters
//! where each window after the first starts `chunk_overlap` characters
//! before the previous one ended. Window ends prefer natural boundaries
//! (paragraph, line, sentence, clause, word) and fall back to a hard cut
//! at `chunk_size`.
//!
//! Lengths are measured in Unicode scalar values, so CJK text is sized
//! the same way as ASCII.
//!
//! Dropping the first `chunk_overlap` characters of every chunk but the
//! first and concatenating the rest reproduces the input exactly.

use crate::models::Chunk;

/// Break points, highest preference first. A chunk ends right after one.
const SEPARATORS: &[&str] = &[
    "\n\n", "\n", "。", "！", "？", ". ", "! ", "? ", "；", "; ", "，", ", ", " ",
];

/// Split `text` into overlapping chunks tagged with `source_path`.
///
/// Empty input yields no chunks. `chunk_overlap` is clamped below
/// `chunk_size`, and a `chunk_size` of zero is treated as one.
pub fn chunk_text(
    source_path: &str,
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let size = chunk_size.max(1);
    let overlap = chunk_overlap.min(size - 1);

    // Byte offset of every char boundary, including the end of the text.
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = offsets.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let hard_end = (start + size).min(total);
        let end = if hard_end == total {
            total
        } else {
            find_break(text, &offsets, start, start + overlap + 1, hard_end).unwrap_or(hard_end)
        };

        let piece = &text[offsets[start]..offsets[end]];
        chunks.push(Chunk::new(source_path, chunks.len(), piece));

        if end == total {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Find the preferred chunk end (a char index) in `min_end..=max_end`.
fn find_break(
    text: &str,
    offsets: &[usize],
    start: usize,
    min_end: usize,
    max_end: usize,
) -> Option<usize> {
    let window = &text[offsets[start]..offsets[max_end]];

    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let byte_end = pos + sep.len();
            let end = start + window[..byte_end].chars().count();
            if end >= min_end {
                return Some(end);
            }
        }
    }

    None
}
