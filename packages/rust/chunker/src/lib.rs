//! Deterministic text chunking.
//!
//! Segments a page's normalized text into overlapping, token-bounded chunks
//! whose boundaries prefer paragraph breaks, then sentence breaks. Token
//! counts are approximated at 4 characters per token throughout; the same
//! approximation keeps chunk ids stable across runs.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use docvec_shared::{DocumentPage, Result, TextChunk};

/// Minimum characters a chunk must have to be worth embedding.
const MIN_CHUNK_CHARS: usize = 10;

static PARAGRAPHS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{2,}").expect("valid regex"));
static SENTENCE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("valid regex"));

/// Approximate token count: 4 characters per token.
pub fn count_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Splits documents into overlapping token-bounded chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Chunker with a target size and overlap, both in tokens.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap,
        }
    }

    /// Split one document into chunks.
    ///
    /// Deterministic: the same text, size, and overlap always produce the
    /// same chunks with the same ids. Pieces shorter than 10 characters
    /// (terminal overlap tails) are dropped before indices are assigned.
    pub fn chunk(&self, document: &DocumentPage) -> Result<Vec<TextChunk>> {
        let text = &document.extracted_text;
        if text.trim().is_empty() {
            warn!(url = %document.url, "empty document, no chunks");
            return Ok(Vec::new());
        }

        let pieces = self.split_text(text);
        let positions = self.char_positions(text, &pieces);

        let kept: Vec<(String, (usize, usize))> = pieces
            .into_iter()
            .zip(positions)
            .filter(|(piece, _)| piece.chars().count() >= MIN_CHUNK_CHARS)
            .collect();

        if kept.is_empty() {
            warn!(url = %document.url, "document too short to chunk");
            return Ok(Vec::new());
        }

        let total = kept.len();
        let mut metadata = document.metadata.clone();
        metadata.insert("content_hash".to_string(), document.content_hash.clone());

        let chunks = kept
            .into_iter()
            .enumerate()
            .map(|(index, (piece, (start, end)))| {
                let token_count = count_tokens(&piece);
                TextChunk::new(
                    piece,
                    &document.url,
                    &document.title,
                    index,
                    total,
                    token_count,
                    start,
                    end,
                    metadata.clone(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            url = %document.url,
            total_chunks = chunks.len(),
            "document chunked"
        );
        Ok(chunks)
    }

    /// Core splitting pass over paragraphs and, for oversized paragraphs,
    /// sentences. Returns raw chunk texts in order.
    fn split_text(&self, text: &str) -> Vec<String> {
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0usize;

        for para in PARAGRAPHS.split(text) {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }
            let para_tokens = count_tokens(para);

            if (para_tokens as f64) > self.chunk_size as f64 * 1.5 {
                // Oversized paragraph: iterate its sentences instead.
                for sentence in split_sentences(para) {
                    let sentence = sentence.trim();
                    if sentence.is_empty() {
                        continue;
                    }
                    let sentence_tokens = count_tokens(sentence);

                    if sentence_tokens > self.chunk_size {
                        // A single sentence longer than the budget is split
                        // into fixed character windows; each window rides on
                        // the overlap tail of the chunk before it.
                        self.flush(&mut chunks, &mut current, &mut current_tokens);
                        let windows = char_windows(sentence, self.chunk_size * 4);
                        let last = windows.len() - 1;
                        for (i, window) in windows.iter().enumerate() {
                            current.push_str(window);
                            current_tokens = count_tokens(&current);
                            if i < last {
                                self.flush(&mut chunks, &mut current, &mut current_tokens);
                            }
                        }
                        continue;
                    }

                    if current_tokens + sentence_tokens > self.chunk_size {
                        self.flush(&mut chunks, &mut current, &mut current_tokens);
                    }
                    if !current.is_empty() {
                        current.push(' ');
                    }
                    current.push_str(sentence);
                    current_tokens += sentence_tokens;
                }
            } else {
                if current_tokens + para_tokens > self.chunk_size {
                    self.flush(&mut chunks, &mut current, &mut current_tokens);
                }
                if !current.is_empty() {
                    current.push_str("\n\n");
                }
                current.push_str(para);
                current_tokens += para_tokens;
            }
        }

        let tail = current.trim();
        if !tail.is_empty() {
            chunks.push(tail.to_string());
        }

        if chunks.is_empty() {
            // Degenerate input: emit a single truncated chunk.
            return vec![char_head(text, self.chunk_size * 4).to_string()];
        }
        chunks
    }

    /// Emit the accumulator as a chunk and re-seed it with the overlap tail.
    fn flush(&self, chunks: &mut Vec<String>, current: &mut String, current_tokens: &mut usize) {
        let trimmed = current.trim();
        if trimmed.is_empty() {
            current.clear();
            *current_tokens = 0;
            return;
        }
        chunks.push(trimmed.to_string());

        if self.overlap > 0 {
            let tail = char_tail(current, self.overlap * 4).to_string();
            *current = tail;
            *current_tokens = count_tokens(current);
        } else {
            current.clear();
            *current_tokens = 0;
        }
    }

    /// Locate each chunk in the original text, advancing a cursor by the
    /// emitted length minus the overlap so overlapping chunks are found in
    /// order. Positions are character offsets; a chunk that cannot be found
    /// verbatim falls back to the cursor.
    fn char_positions(&self, full_text: &str, chunks: &[String]) -> Vec<(usize, usize)> {
        let mut positions = Vec::with_capacity(chunks.len());
        let mut cursor = 0usize; // byte offset, always on a char boundary

        for chunk in chunks {
            let start_byte = match full_text[cursor..].find(chunk.as_str()) {
                Some(rel) => cursor + rel,
                None => cursor,
            };
            let end_byte = floor_boundary(full_text, start_byte + chunk.len());

            let start_char = full_text[..start_byte.min(full_text.len())].chars().count();
            let end_char = start_char + chunk.chars().count();
            positions.push((start_char, end_char));

            cursor = if self.overlap > 0 {
                step_back_chars(full_text, end_byte, self.overlap * 4)
            } else {
                end_byte
            };
        }

        positions
    }
}

/// Split on sentence terminators followed by whitespace, keeping the
/// terminator with its sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;
    for m in SENTENCE_BREAK.find_iter(text) {
        // The terminator is a single ASCII byte; keep it on the left side.
        parts.push(&text[last..m.start() + 1]);
        last = m.end();
    }
    if last < text.len() {
        parts.push(&text[last..]);
    }
    parts
}

/// Last `n` characters of a string.
fn char_tail(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    let (idx, _) = s
        .char_indices()
        .nth(count - n)
        .expect("index within string");
    &s[idx..]
}

/// First `n` characters of a string.
fn char_head(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Consecutive windows of `size` characters.
fn char_windows(s: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut windows = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        let head = char_head(rest, size);
        windows.push(head);
        rest = &rest[head.len()..];
    }
    windows
}

/// Clamp a byte index to the string and the nearest char boundary at or
/// before it.
fn floor_boundary(s: &str, idx: usize) -> usize {
    let mut idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Walk `chars_back` characters back from a byte index.
fn step_back_chars(s: &str, byte_idx: usize, chars_back: usize) -> usize {
    let mut idx = floor_boundary(s, byte_idx);
    for _ in 0..chars_back {
        if idx == 0 {
            break;
        }
        idx -= 1;
        while idx > 0 && !s.is_char_boundary(idx) {
            idx -= 1;
        }
    }
    idx
}
