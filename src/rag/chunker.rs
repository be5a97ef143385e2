//! Text chunking for knowledge-base ingestion.
//!
//! Splits raw document text into overlapping segments sized for
//! embedding, preferring sentence boundaries over hard cuts.

use log::warn;

/// Default maximum characters per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between adjacent chunks for context continuity.
pub const DEFAULT_OVERLAP: usize = 200;

/// How far back from a window end to look for a sentence boundary.
const BOUNDARY_LOOKBACK: usize = 200;

/// Split text into overlapping chunks.
///
/// Text no longer than `chunk_size` comes back as a single trimmed
/// chunk. Otherwise the text is scanned in windows of `chunk_size`
/// characters; each cut point is pulled back to just after the nearest
/// sentence terminator (`.`, `!`, `?`, or newline) within
/// [`BOUNDARY_LOOKBACK`] of the window end, falling back to the raw
/// boundary when none is found. Adjacent chunks share `overlap`
/// characters. Only non-empty trimmed chunks are emitted.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.len() <= chunk_size {
        return vec![text.to_string()];
    }

    // An overlap as large as the window would stall the scan.
    let overlap = if overlap >= chunk_size {
        warn!(
            "chunk overlap {} >= chunk size {}, clamping",
            overlap, chunk_size
        );
        chunk_size - 1
    } else {
        overlap
    };

    let bytes = text.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let window_end = floor_char_boundary(text, (start + chunk_size).min(text.len()));
        let cut = if window_end < text.len() {
            find_sentence_cut(bytes, start, window_end).unwrap_or(window_end)
        } else {
            window_end
        };

        let chunk = text[start..cut].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if cut >= text.len() {
            break;
        }

        // Step back by the overlap unless the chunk was too small for it.
        let step = cut - start;
        start = if step <= overlap {
            cut
        } else {
            floor_char_boundary(text, cut - overlap)
        };
    }

    chunks
}

/// Split each document in order and concatenate the results.
pub fn split_documents(documents: &[String], chunk_size: usize, overlap: usize) -> Vec<String> {
    documents
        .iter()
        .flat_map(|doc| split(doc, chunk_size, overlap))
        .collect()
}

/// Search backward from `window_end` for a sentence terminator, within
/// the lookback distance and never past `start`. Returns the position
/// just after the terminator.
fn find_sentence_cut(bytes: &[u8], start: usize, window_end: usize) -> Option<usize> {
    let lookback_floor = start.max(window_end.saturating_sub(BOUNDARY_LOOKBACK));
    (lookback_floor..window_end)
        .rev()
        .find(|&i| matches!(bytes[i], b'.' | b'!' | b'?' | b'\n'))
        .map(|i| i + 1)
}

/// Largest char boundary not exceeding `index`.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}
