//! Content chunking for retrieval.
//!
//! Text is first cut into structural units (heading lines and blank-line
//! separated paragraphs); units larger than the budget are split at the last
//! whitespace that fits, or at a char boundary when there is none. Units are
//! then packed greedily into windows of at most `chunk_size` bytes, and each
//! window starts up to `overlap` bytes before the end of the previous one.
//!
//! Windows always cover the whole text: the first starts at 0, the last ends
//! at `text.len()`, and every window starts after the previous start and no
//! later than the previous end. Chunk text is an exact slice of the input.

use crate::error::{IndexError, IndexResult};
use lore_core::{Chunk, ChunkPriority, Document, Section};

/// Configuration for chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum size of each chunk in bytes.
    pub chunk_size: usize,
    /// Maximum number of bytes shared by consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            overlap: 256,
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, overlap_fraction: f64) -> IndexResult<Self> {
        if chunk_size < 16 {
            return Err(IndexError::InvalidChunkConfig(format!(
                "chunk size {} is too small",
                chunk_size
            )));
        }
        if !(0.0..0.5).contains(&overlap_fraction) {
            return Err(IndexError::InvalidChunkConfig(format!(
                "overlap fraction {} must be in [0.0, 0.5)",
                overlap_fraction
            )));
        }
        Ok(Self {
            chunk_size,
            overlap: (chunk_size as f64 * overlap_fraction).floor() as usize,
        })
    }

    /// Create config from chunking settings.
    pub fn from_config(config: &lore_config::ChunkingConfig) -> IndexResult<Self> {
        Self::new(config.chunk_size, config.overlap_fraction)
    }
}

/// Content chunker for splitting canonical text.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    /// Create a new chunker with the given configuration.
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Chunk a document. Failed documents produce no chunks.
    pub fn chunk_document(&self, doc: &Document) -> Vec<Chunk> {
        if doc.is_failed() {
            return Vec::new();
        }

        self.spans(&doc.text)
            .into_iter()
            .enumerate()
            .map(|(i, (start, end))| Chunk {
                fingerprint: doc.fingerprint.clone(),
                kb_id: doc.kb_id.clone(),
                origin_id: doc.origin_id.clone(),
                chunk_index: i as u32,
                start,
                end,
                priority: priority_for(&doc.sections, start, end),
                text: doc.text[start..end].to_string(),
            })
            .collect()
    }

    /// Byte ranges of the windows covering `text`.
    pub fn spans(&self, text: &str) -> Vec<(usize, usize)> {
        let len = text.len();
        if len == 0 {
            return Vec::new();
        }

        let budget = self.config.chunk_size;
        let bounds = self.unit_bounds(text);

        let mut spans = Vec::new();
        let mut start = 0;
        let mut next = 0;

        loop {
            // bounds[next] - start <= budget holds on entry
            let mut j = next;
            while j + 1 < bounds.len() && bounds[j + 1] - start <= budget {
                j += 1;
            }
            let end = bounds[j];
            spans.push((start, end));

            if end == len {
                break;
            }

            let following = bounds[j + 1];
            let target = end
                .saturating_sub(self.config.overlap)
                .max(start + 1)
                .max(following.saturating_sub(budget));
            start = after_whitespace(text, ceil_boundary(text, target), end);
            next = j + 1;
        }

        spans
    }

    /// Unit end offsets, ascending, each at most `chunk_size` past the previous.
    fn unit_bounds(&self, text: &str) -> Vec<usize> {
        let budget = self.config.chunk_size;
        let mut bounds = Vec::new();
        let mut unit_start = 0;

        for unit_end in structural_ends(text) {
            let mut cut = unit_start;
            while unit_end - cut > budget {
                cut = split_point(text, cut, budget);
                bounds.push(cut);
            }
            bounds.push(unit_end);
            unit_start = unit_end;
        }

        bounds
    }
}

/// End offsets of headings and paragraphs. The last one is `text.len()`.
fn structural_ends(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut offset = 0;
    let mut prev_blank = true;
    let mut prev_heading = false;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        let blank = trimmed.is_empty();
        let heading = is_heading(trimmed);
        if offset > 0 && !blank && (heading || prev_blank || prev_heading) {
            starts.push(offset);
        }
        prev_blank = blank;
        prev_heading = heading;
        offset += line.len();
    }

    starts.push(text.len());
    starts
}

fn is_heading(line: &str) -> bool {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    (1..=6).contains(&hashes)
        && line[hashes..]
            .chars()
            .next()
            .map_or(true, char::is_whitespace)
}

/// Where to cut a unit that starts at `from` and exceeds `budget`.
fn split_point(text: &str, from: usize, budget: usize) -> usize {
    let limit = floor_boundary(text, from + budget);
    if limit <= from {
        // Budget smaller than one char; take the char whole
        return ceil_boundary(text, from + 1);
    }
    match text[from..limit].rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => {
            let ws_len = text[from + pos..].chars().next().map_or(1, char::len_utf8);
            from + pos + ws_len
        }
        _ => limit,
    }
}

/// First offset after a whitespace char in `[from, end)`, or `end`.
fn after_whitespace(text: &str, from: usize, end: usize) -> usize {
    if from >= end {
        return end;
    }
    match text[from..end].char_indices().find(|(_, c)| c.is_whitespace()) {
        Some((pos, c)) => (from + pos + c.len_utf8()).min(end),
        None => end,
    }
}

fn floor_boundary(text: &str, mut i: usize) -> usize {
    if i >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(text: &str, mut i: usize) -> usize {
    if i >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn priority_for(sections: &[Section], start: usize, end: usize) -> ChunkPriority {
    sections
        .iter()
        .filter(|s| s.offset >= start && s.offset < end)
        .map(|s| {
            if s.level <= 1 {
                ChunkPriority::Title
            } else {
                ChunkPriority::Heading
            }
        })
        .max()
        .unwrap_or(ChunkPriority::Body)
}
