//! Text chunkers.
//!
//! Two strategies are available:
//!
//! - **Paragraph** ([`chunk_text`]): accumulates `\n\n`-separated paragraphs
//!   up to `max_tokens` (4 chars per token), hard-splitting oversized
//!   paragraphs at the nearest newline or space.
//! - **Recursive** ([`chunk_recursive`]): splits on the first separator of
//!   `["\n\n", "\n", " ", ""]` that occurs in the text, recursing into
//!   pieces that are still too long, then merges neighbours back together
//!   up to `chunk_size` characters with `chunk_overlap` characters carried
//!   between consecutive chunks.
//!
//! Both return contiguous indices starting at 0, a fresh UUID per chunk,
//! and a SHA-256 of the chunk text for embedding staleness checks. At least
//! one chunk is produced for every document.
//!
//! # Example
//!
//! ```rust
//! use finrag_core::chunk::{chunk_text, ChunkStrategy};
//!
//! let chunks = chunk_text("doc-123", "Hello world.\n\nSecond paragraph.", 700);
//! assert_eq!(chunks.len(), 1);
//!
//! let strategy = ChunkStrategy::Recursive { chunk_size: 20, chunk_overlap: 5 };
//! let chunks = strategy.chunk("doc-123", "Revenue grew strongly in the fourth quarter of 2024.");
//! assert!(chunks.len() > 1);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

const CHARS_PER_TOKEN: usize = 4;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Chunking strategy selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    Paragraph { max_tokens: usize },
    Recursive {
        chunk_size: usize,
        chunk_overlap: usize,
    },
}

impl ChunkStrategy {
    /// Split `text` into chunks owned by `document_id`.
    pub fn chunk(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        match *self {
            ChunkStrategy::Paragraph { max_tokens } => chunk_text(document_id, text, max_tokens),
            ChunkStrategy::Recursive {
                chunk_size,
                chunk_overlap,
            } => chunk_recursive(document_id, text, chunk_size, chunk_overlap),
        }
    }
}

/// Split text into chunks on paragraph boundaries, respecting `max_tokens`.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);

    if text.is_empty() {
        return vec![make_chunk(document_id, 0, text)];
    }

    let mut chunks = Vec::new();
    let mut current_buf = String::new();
    let mut chunk_index: i64 = 0;

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            chunks.push(make_chunk(document_id, chunk_index, &current_buf));
            chunk_index += 1;
            current_buf.clear();
        }

        if trimmed.len() > max_chars {
            for piece in hard_split(trimmed, max_chars) {
                chunks.push(make_chunk(document_id, chunk_index, piece));
                chunk_index += 1;
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        chunks.push(make_chunk(document_id, chunk_index, &current_buf));
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(document_id, 0, text.trim()));
    }

    chunks
}

/// Cut an oversized paragraph into trimmed pieces of at most `max_chars`
/// bytes, preferring a newline or space as the cut point.
fn hard_split(text: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let mut split_at = snap_to_char_boundary(remaining, max_chars);
        if split_at < remaining.len() {
            if let Some(pos) = remaining[..split_at]
                .rfind('\n')
                .or_else(|| remaining[..split_at].rfind(' '))
            {
                split_at = pos + 1;
            }
        }
        if split_at == 0 {
            split_at = next_char_boundary(remaining);
        }

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        remaining = &remaining[split_at..];
    }

    pieces
}

/// Split text with the recursive character strategy and wrap each piece
/// in a [`Chunk`].
pub fn chunk_recursive(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Chunk> {
    let pieces = split_recursive(text, chunk_size, chunk_overlap);
    if pieces.is_empty() {
        return vec![make_chunk(document_id, 0, text.trim())];
    }
    pieces
        .iter()
        .enumerate()
        .map(|(i, p)| make_chunk(document_id, i as i64, p))
        .collect()
}

/// Recursive character splitter. Lengths are measured in characters.
///
/// Returns trimmed, non-empty pieces. A piece only exceeds `chunk_size`
/// when no separator can break it further, which cannot happen because the
/// final separator splits between characters.
pub fn split_recursive(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chunk_overlap = chunk_overlap.min(chunk_size.saturating_sub(1));
    split_with(text, &SEPARATORS, chunk_size, chunk_overlap)
}

fn split_with(
    text: &str,
    separators: &[&'static str],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let mut separator = "";
    let mut rest: &[&'static str] = &[];
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            separator = sep;
            rest = &separators[i + 1..];
            break;
        }
    }

    let splits: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|s| !s.is_empty()).collect()
    };

    let mut out = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in splits {
        if char_len(piece) <= chunk_size {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            out.extend(merge_splits(&fitting, separator, chunk_size, chunk_overlap));
            fitting.clear();
        }
        if rest.is_empty() {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        } else {
            out.extend(split_with(piece, rest, chunk_size, chunk_overlap));
        }
    }

    if !fitting.is_empty() {
        out.extend(merge_splits(&fitting, separator, chunk_size, chunk_overlap));
    }

    out
}

/// Greedily join small pieces with `separator` into windows of at most
/// `chunk_size` characters, keeping up to `chunk_overlap` characters of the
/// previous window's tail at the start of the next.
fn merge_splits(
    splits: &[&str],
    separator: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut docs = Vec::new();
    let mut window: std::collections::VecDeque<&str> = std::collections::VecDeque::new();
    let mut total = 0usize;

    for &piece in splits {
        let len = char_len(piece);
        let joined_len = total + len + if window.is_empty() { 0 } else { sep_len };

        if joined_len > chunk_size && !window.is_empty() {
            push_joined(&mut docs, &window, separator);

            while total > chunk_overlap
                || (total + len + if window.is_empty() { 0 } else { sep_len } > chunk_size
                    && total > 0)
            {
                let Some(front) = window.pop_front() else {
                    break;
                };
                total -= char_len(front) + if window.is_empty() { 0 } else { sep_len };
            }
        }

        total += len + if window.is_empty() { 0 } else { sep_len };
        window.push_back(piece);
    }

    push_joined(&mut docs, &window, separator);
    docs
}

fn push_joined(docs: &mut Vec<String>, window: &std::collections::VecDeque<&str>, sep: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(sep);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(s: &str) -> usize {
    s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
}

/// Build a [`Chunk`] with a fresh UUID and the SHA-256 of its text.
pub fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: hash_text(text),
    }
}

/// SHA-256 hex digest of `text`.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
