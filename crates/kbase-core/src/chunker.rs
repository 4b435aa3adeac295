//! Boundary-aware sliding window splitter.
//!
//! Sizes and offsets are counted in characters. A window is cut at the
//! latest paragraph break it contains, else the latest sentence end, else
//! the latest whitespace, else hard at `chunk_size`. Breaks closer to the
//! window start than half a window are ignored. Consecutive chunks share
//! up to `chunk_overlap` characters and chunk text is never trimmed, so the
//! document can be rebuilt from its chunks and their offsets.

use std::ops::Range;

use crate::config::ChunkingSettings;
use crate::error::Result;
use crate::types::{Chunk, ChunkId, ChunkMetadata, Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        ChunkingSettings {
            chunk_size,
            chunk_overlap,
        }
        .validate()?;
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_settings(settings: &ChunkingSettings) -> Result<Self> {
        Self::new(settings.chunk_size, settings.chunk_overlap)
    }

    /// Character ranges of the chunks of `text`, in order.
    pub fn spans(&self, text: &str) -> Vec<Range<usize>> {
        let chars: Vec<char> = text.chars().collect();
        self.spans_of(&chars)
    }

    fn spans_of(&self, chars: &[char]) -> Vec<Range<usize>> {
        let len = chars.len();
        let mut spans = Vec::new();
        let mut start = 0;
        let mut prev_end = 0;
        while start < len {
            let limit = (start + self.chunk_size).min(len);
            let end = if limit == len {
                len
            } else {
                let floor = (limit - self.chunk_size / 2)
                    .max(prev_end + 1)
                    .max(start + 1);
                find_break(chars, floor, limit).unwrap_or(limit)
            };
            spans.push(start..end);
            if end == len {
                break;
            }
            prev_end = end;
            start = end.saturating_sub(self.chunk_overlap).max(start + 1);
        }
        spans
    }

    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let chars: Vec<char> = document.raw_text.chars().collect();
        let spans = self.spans_of(&chars);
        let total_chunks = spans.len();
        let source = document.source();
        let filename = document.filename();

        spans
            .into_iter()
            .enumerate()
            .map(|(chunk_index, span)| Chunk {
                id: chunk_id(&source, chunk_index),
                text: chars[span.clone()].iter().collect(),
                metadata: ChunkMetadata {
                    source: source.clone(),
                    category: document.category.clone(),
                    filename: filename.clone(),
                    rel_path: document.rel_path.clone(),
                    chunk_index,
                    total_chunks,
                    start: span.start,
                    end: span.end,
                },
                embedding: Vec::new(),
            })
            .collect()
    }
}

/// Deterministic id so re-chunking the same file yields the same ids.
pub fn chunk_id(source: &str, chunk_index: usize) -> ChunkId {
    let hash = blake3::hash(format!("{source}#{chunk_index}").as_bytes());
    hash.to_hex()[..32].to_string()
}

/// Latest break position `p` in `[floor, limit]`, meaning `chars[..p]` ends
/// with the separator.
fn find_break(chars: &[char], floor: usize, limit: usize) -> Option<usize> {
    let paragraph = |p: usize| p >= 2 && chars[p - 2] == '\n' && chars[p - 1] == '\n';
    let sentence = |p: usize| {
        p >= 2 && matches!(chars[p - 2], '.' | '!' | '?') && chars[p - 1].is_whitespace()
    };
    let space = |p: usize| p >= 1 && chars[p - 1].is_whitespace();

    let rules: [&dyn Fn(usize) -> bool; 3] = [&paragraph, &sentence, &space];
    rules
        .iter()
        .find_map(|rule| (floor..=limit).rev().find(|&p| rule(p)))
}
