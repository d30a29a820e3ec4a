//! Splits normalized documents into overlapping chunks for embedding.
//!
//! The splitter walks an ordered list of separators from coarsest to finest
//! (paragraph, line, sentence, word, then a hard character cut). A piece that is
//! still longer than `chunk_size` is re-split with the next separator. The pieces
//! are then merged left to right into chunks of at most `chunk_size` characters;
//! consecutive chunks share whole trailing pieces totalling at most `chunk_overlap`
//! characters.
//!
//! Every chunk is an exact slice of the document text, so the chunks of a document
//! cover it completely. Lengths are counted in chars, not bytes.

use std::collections::VecDeque;
use std::ops::Range;

use serde::Serialize;

use crate::normalize::MinimalDoc;

/// Default maximum characters per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 500;
/// Default number of characters repeated between consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 20;

/// A bounded slice of a document, the unit that gets embedded and indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub content: String,
    pub source: Option<String>,
    /// Position of this chunk in the output of one chunking call (0, 1, 2, …).
    /// Pages of one file are chunked together, so the index is unique per source.
    pub index: usize,
    /// Char offset of the chunk within its page.
    pub start: usize,
}

/// A boundary the splitter may cut at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Separator {
    /// Cut after the delimiter; it stays at the end of the preceding piece.
    After(String),
    /// Cut before the delimiter; it opens the following piece.
    Before(String),
    /// Cut every `chunk_size` characters regardless of content.
    Chars,
}

impl Separator {
    fn occurs_in(&self, text: &str) -> bool {
        match self {
            Separator::After(d) | Separator::Before(d) => !d.is_empty() && text.contains(d.as_str()),
            Separator::Chars => true,
        }
    }
}

impl From<&str> for Separator {
    /// The empty string means a hard character cut; anything else splits after itself.
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Separator::Chars
        } else {
            Separator::After(s.to_string())
        }
    }
}

/// Paragraph, line, sentence end, word, character.
pub fn default_separators() -> Vec<Separator> {
    ["\n\n", "\n", ". ", "? ", "! ", " ", ""]
        .into_iter()
        .map(Separator::from)
        .collect()
}

/// Headings and code fences first, then the prose boundaries.
pub fn markdown_separators() -> Vec<Separator> {
    let mut seps: Vec<Separator> = ["\n# ", "\n## ", "\n### ", "\n#### ", "\n```"]
        .into_iter()
        .map(|d| Separator::Before(d.to_string()))
        .collect();
    seps.extend(default_separators());
    seps
}

#[derive(Debug, Clone)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separators: Vec<Separator>,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separators: default_separators(),
        }
    }
}

impl SplitterConfig {
    pub fn validate(&self) -> Result<(), ChunkConfigError> {
        if self.chunk_size == 0 {
            return Err(ChunkConfigError::ZeroChunkSize);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkConfigError::OverlapTooLarge {
                overlap: self.chunk_overlap,
                size: self.chunk_size,
            });
        }
        if self.separators.is_empty() {
            return Err(ChunkConfigError::NoSeparators);
        }
        Ok(())
    }
}

/// Recursive boundary-seeking splitter. Construct with [`TextSplitter::new`], which
/// rejects degenerate configurations.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    config: SplitterConfig,
}

impl TextSplitter {
    pub fn new(config: SplitterConfig) -> Result<Self, ChunkConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Chunk all documents, concatenating per-document chunks in input order
    /// and numbering them across the whole batch.
    pub fn chunk_docs(&self, docs: &[MinimalDoc]) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = docs.iter().flat_map(|d| self.chunk_doc(d)).collect();
        for (index, chunk) in chunks.iter_mut().enumerate() {
            chunk.index = index;
        }
        chunks
    }

    /// Chunk a single document; each chunk inherits the document's source.
    pub fn chunk_doc(&self, doc: &MinimalDoc) -> Vec<Chunk> {
        let text = doc.content.as_str();
        let mut chunks = Vec::new();
        // Char offsets are tracked incrementally since spans only move forward.
        let mut byte_pos = 0;
        let mut char_pos = 0;
        for (index, span) in self.split_spans(text).into_iter().enumerate() {
            char_pos += text[byte_pos..span.start].chars().count();
            byte_pos = span.start;
            chunks.push(Chunk {
                content: text[span].to_string(),
                source: doc.source.clone(),
                index,
                start: char_pos,
            });
        }
        chunks
    }

    /// Splits `text` into chunk slices, in order.
    pub fn split_text<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.split_spans(text)
            .into_iter()
            .map(|span| &text[span])
            .collect()
    }

    fn split_spans(&self, text: &str) -> Vec<Range<usize>> {
        if text.is_empty() {
            return Vec::new();
        }
        if text.chars().count() <= self.config.chunk_size {
            return vec![0..text.len()];
        }
        let mut pieces = Vec::new();
        self.collect_pieces(text, 0..text.len(), &self.config.separators, &mut pieces);
        self.merge(text, &pieces)
    }

    /// Breaks `range` into contiguous pieces of at most `chunk_size` chars, using the
    /// first separator present in the range and finer ones for pieces still too long.
    fn collect_pieces(
        &self,
        text: &str,
        range: Range<usize>,
        separators: &[Separator],
        out: &mut Vec<Range<usize>>,
    ) {
        let segment = &text[range.clone()];
        let (parts, finer) = match separators.iter().position(|s| s.occurs_in(segment)) {
            Some(i) => (
                split_on(segment, &separators[i], self.config.chunk_size),
                &separators[i + 1..],
            ),
            None => (hard_cut(segment, self.config.chunk_size), &separators[..0]),
        };
        for part in parts {
            let abs = range.start + part.start..range.start + part.end;
            if text[abs.clone()].chars().count() <= self.config.chunk_size {
                out.push(abs);
            } else {
                self.collect_pieces(text, abs, finer, out);
            }
        }
    }

    /// Greedily packs pieces into chunks. After a chunk is emitted, pieces are dropped
    /// from the front until what remains fits the overlap budget and leaves room for the
    /// next piece; the remainder opens the next chunk.
    fn merge(&self, text: &str, pieces: &[Range<usize>]) -> Vec<Range<usize>> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let mut spans = Vec::new();
        let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = text[piece.clone()].chars().count();
            if total + len > size {
                if let Some(span) = window_span(&window) {
                    spans.push(span);
                }
                while total > overlap || (total > 0 && total + len > size) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((piece.clone(), len));
            total += len;
        }
        if let Some(span) = window_span(&window) {
            spans.push(span);
        }
        spans
    }
}

fn window_span(window: &VecDeque<(Range<usize>, usize)>) -> Option<Range<usize>> {
    let first = window.front()?;
    let last = window.back()?;
    Some(first.0.start..last.0.end)
}

/// Splits `text` at every occurrence of the separator. Pieces are contiguous,
/// non-empty and cover `text`.
fn split_on(text: &str, sep: &Separator, chunk_size: usize) -> Vec<Range<usize>> {
    let mut parts = Vec::new();
    let mut start = 0;
    match sep {
        Separator::After(d) => {
            for (idx, m) in text.match_indices(d.as_str()) {
                let end = idx + m.len();
                parts.push(start..end);
                start = end;
            }
        }
        Separator::Before(d) => {
            for (idx, _) in text.match_indices(d.as_str()) {
                if idx > start {
                    parts.push(start..idx);
                    start = idx;
                }
            }
        }
        Separator::Chars => return hard_cut(text, chunk_size),
    }
    if start < text.len() {
        parts.push(start..text.len());
    }
    parts
}

/// Cuts `text` into pieces of exactly `chunk_size` chars (the last may be shorter).
fn hard_cut(text: &str, chunk_size: usize) -> Vec<Range<usize>> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == chunk_size {
            parts.push(start..idx);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        parts.push(start..text.len());
    }
    parts
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkConfigError {
    #[error("chunk_size must be positive")]
    ZeroChunkSize,
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge { overlap: usize, size: usize },
    #[error("at least one separator is required")]
    NoSeparators,
}
