//! Paragraph-boundary text chunker.
//!
//! Splits extracted text and transcripts into [`Chunk`]s that respect a
//! configurable `max_tokens` limit. Splitting occurs on paragraph boundaries
//! (`\n\n`) to keep related sentences together.
//!
//! Chunk ids are derived from the source id and index, and each chunk
//! carries a SHA-256 of its text, so the same input always chunks to the
//! same output. That matters here: chunks end up inside a cached index.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks on paragraph boundaries, respecting max_tokens.
/// Returns chunks with contiguous indices starting at 0; whitespace-only
/// text yields no chunks.
pub fn chunk_text(source_id: &str, source: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);

    let mut chunks = Vec::new();
    let mut current_buf = String::new();
    let mut chunk_index: i64 = 0;

    let push = |buf: &str, index: &mut i64, chunks: &mut Vec<Chunk>| {
        chunks.push(make_chunk(source_id, source, *index, buf));
        *index += 1;
    };

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len() // +2 for \n\n separator
        };

        if would_be > max_chars && !current_buf.is_empty() {
            push(&current_buf, &mut chunk_index, &mut chunks);
            current_buf.clear();
        }

        if trimmed.len() > max_chars {
            // Hard split an oversized paragraph, preferring newline/space boundaries.
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, max_chars);
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let piece = remaining[..actual_split].trim();
                if !piece.is_empty() {
                    push(piece, &mut chunk_index, &mut chunks);
                }
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        push(&current_buf, &mut chunk_index, &mut chunks);
    }

    chunks
}

/// Largest char boundary `<= max`, but at least one full char.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    if idx == 0 {
        s.chars().next().map(char::len_utf8).unwrap_or(s.len())
    } else {
        idx
    }
}

fn make_chunk(source_id: &str, source: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}-{}", source_id, index),
        source: source.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
