//! Passage chunking for reference documents
//!
//! Every chunk is a contiguous byte range of the source text, so its offsets
//! can be used to trace a passage back to the document it came from.

#[cfg(test)]
mod tests;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A passage cut from a document, ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    /// Exact source text of `start_offset..end_offset`
    pub content: String,
    /// Document title followed by the enclosing markdown headings
    pub heading_path: String,
    /// The index of this chunk within the document
    pub chunk_index: usize,
    /// Byte offset of the first character in the source
    pub start_offset: usize,
    /// Byte offset one past the last character in the source
    pub end_offset: usize,
    /// Estimated token count
    pub token_count: usize,
}

/// Configuration for content chunking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens
    pub target_chunk_size: usize,
    /// Maximum chunk size in tokens before forced splitting
    pub max_chunk_size: usize,
    /// Minimum chunk size in tokens (smaller chunks will be merged)
    pub min_chunk_size: usize,
    /// Overlap size in tokens between adjacent chunks
    pub overlap_size: usize,
    /// Whether to break at sentence boundaries when possible
    pub sentence_boundary_splitting: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_chunk_size: 200,
            max_chunk_size: 400,
            min_chunk_size: 40,
            overlap_size: 20,
            sentence_boundary_splitting: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    fn text(self, source: &str) -> &str {
        source.get(self.start..self.end).unwrap_or_default()
    }

    fn tokens(self, source: &str) -> usize {
        estimate_token_count(self.text(source))
    }

    /// Shrink to exclude surrounding whitespace
    fn trimmed(self, source: &str) -> Self {
        let text = self.text(source);
        let lead = text.len() - text.trim_start().len();
        let trail = text.len() - text.trim_end().len();
        if lead == text.len() {
            return Self::new(self.start, self.start);
        }
        Self::new(self.start + lead, self.end - trail)
    }

    const fn is_empty(self) -> bool {
        self.start >= self.end
    }
}

#[derive(Debug, Clone)]
struct Section {
    heading_path: String,
    span: Span,
}

#[derive(Debug, Clone)]
struct Draft {
    section: usize,
    span: Span,
}

/// Split a document into passages with exact source offsets
#[inline]
pub fn chunk_document(source: &str, title: &str, config: &ChunkingConfig) -> Vec<ContentChunk> {
    let sections = split_sections(source, title);

    let mut drafts = Vec::new();
    for (index, section) in sections.iter().enumerate() {
        let pieces = section_pieces(source, section.span, config);
        drafts.extend(
            pack(source, &pieces, config.target_chunk_size)
                .into_iter()
                .map(|span| Draft {
                    section: index,
                    span,
                }),
        );
    }

    let merged = merge_small(source, drafts, config);
    let overlapped = if config.overlap_size > 0 {
        add_overlap(source, merged, config.overlap_size)
    } else {
        merged
    };

    let chunks: Vec<ContentChunk> = overlapped
        .into_iter()
        .enumerate()
        .map(|(chunk_index, draft)| {
            let content = draft.span.text(source).to_string();
            ContentChunk {
                token_count: estimate_token_count(&content),
                content,
                heading_path: sections
                    .get(draft.section)
                    .map_or_else(|| title.to_string(), |s| s.heading_path.clone()),
                chunk_index,
                start_offset: draft.span.start,
                end_offset: draft.span.end,
            }
        })
        .collect();

    debug!(
        "Chunked '{}' into {} chunks (avg {} tokens)",
        title,
        chunks.len(),
        chunks.iter().map(|c| c.token_count).sum::<usize>() / chunks.len().max(1)
    );

    chunks
}

/// Markdown ATX heading level and text, if the line is one
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim();
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let rest = trimmed.get(level..)?;
    if !rest.starts_with(' ') {
        return None;
    }
    let text = rest.trim();
    if text.is_empty() {
        return None;
    }
    Some((level, text))
}

/// Split at markdown headings; heading lines themselves are not passage text
fn split_sections(source: &str, title: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut headings: Vec<(usize, String)> = Vec::new();
    let mut heading_path = title.to_string();
    let mut section_start = 0;
    let mut offset = 0;

    for line in source.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let Some((level, text)) = parse_heading(line) else {
            continue;
        };

        let span = Span::new(section_start, line_start).trimmed(source);
        if !span.is_empty() {
            sections.push(Section {
                heading_path: heading_path.clone(),
                span,
            });
        }

        headings.retain(|(l, _)| *l < level);
        headings.push((level, text.to_string()));
        // A top heading repeating the title is not repeated in the path
        heading_path = std::iter::once(title)
            .chain(headings.iter().map(|(_, h)| h.as_str()))
            .dedup()
            .join(" > ");
        section_start = offset;
    }

    let span = Span::new(section_start, source.len()).trimmed(source);
    if !span.is_empty() {
        sections.push(Section { heading_path, span });
    }

    sections
}

/// Paragraphs of a section, with oversized ones broken down further
fn section_pieces(source: &str, section: Span, config: &ChunkingConfig) -> Vec<Span> {
    let mut pieces = Vec::new();
    for paragraph in paragraph_spans(source, section) {
        if paragraph.tokens(source) <= config.max_chunk_size {
            pieces.push(paragraph);
        } else if config.sentence_boundary_splitting {
            for sentence in sentence_spans(source, paragraph) {
                if sentence.tokens(source) <= config.max_chunk_size {
                    pieces.push(sentence);
                } else {
                    pieces.extend(word_spans(source, sentence));
                }
            }
        } else {
            pieces.extend(word_spans(source, paragraph));
        }
    }
    pieces
}

/// Blocks of non-blank lines
fn paragraph_spans(source: &str, section: Span) -> Vec<Span> {
    let mut paragraphs = Vec::new();
    let mut current: Option<Span> = None;
    let mut offset = section.start;

    for line in section.text(source).split_inclusive('\n') {
        let line_span = Span::new(offset, offset + line.len());
        offset += line.len();

        if line.trim().is_empty() {
            if let Some(paragraph) = current.take() {
                paragraphs.push(paragraph.trimmed(source));
            }
        } else {
            current = Some(current.map_or(line_span, |p| Span::new(p.start, line_span.end)));
        }
    }
    if let Some(paragraph) = current {
        paragraphs.push(paragraph.trimmed(source));
    }

    paragraphs.retain(|p| !p.is_empty());
    paragraphs
}

/// Sentences ending in `.`, `!` or `?` followed by whitespace
fn sentence_spans(source: &str, span: Span) -> Vec<Span> {
    let text = span.text(source);
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        let at_boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().is_none_or(|(_, next)| next.is_whitespace());
        if at_boundary {
            let end = index + c.len_utf8();
            sentences.push(Span::new(span.start + start, span.start + end).trimmed(source));
            start = end;
        }
    }
    if start < text.len() {
        sentences.push(Span::new(span.start + start, span.end).trimmed(source));
    }

    sentences.retain(|s| !s.is_empty());
    sentences
}

/// Whitespace-separated words
fn word_spans(source: &str, span: Span) -> Vec<Span> {
    let mut words = Vec::new();
    let mut word_start: Option<usize> = None;

    for (index, c) in span.text(source).char_indices() {
        match (c.is_whitespace(), word_start) {
            (true, Some(start)) => {
                words.push(Span::new(span.start + start, span.start + index));
                word_start = None;
            }
            (false, None) => word_start = Some(index),
            _ => {}
        }
    }
    if let Some(start) = word_start {
        words.push(Span::new(span.start + start, span.end));
    }

    words
}

/// Greedily join adjacent pieces while the joined range stays within `limit` tokens
fn pack(source: &str, pieces: &[Span], limit: usize) -> Vec<Span> {
    let mut packed = Vec::new();
    let mut current: Option<Span> = None;

    for &piece in pieces {
        current = match current {
            Some(cur) if Span::new(cur.start, piece.end).tokens(source) <= limit => {
                Some(Span::new(cur.start, piece.end))
            }
            Some(cur) => {
                packed.push(cur);
                Some(piece)
            }
            None => Some(piece),
        };
    }
    packed.extend(current);
    packed
}

/// Fold undersized chunks into their predecessor within the same section
fn merge_small(source: &str, drafts: Vec<Draft>, config: &ChunkingConfig) -> Vec<Draft> {
    let mut merged: Vec<Draft> = Vec::with_capacity(drafts.len());

    for draft in drafts {
        if let Some(previous) = merged.last_mut() {
            let joined = Span::new(previous.span.start, draft.span.end);
            if previous.section == draft.section
                && draft.span.tokens(source) < config.min_chunk_size
                && joined.tokens(source) <= config.max_chunk_size
            {
                previous.span = joined;
                continue;
            }
        }
        merged.push(draft);
    }

    merged
}

/// Extend each chunk backwards over the last words of its predecessor
fn add_overlap(source: &str, drafts: Vec<Draft>, overlap_tokens: usize) -> Vec<Draft> {
    // Rough word-to-token ratio
    let word_count = (overlap_tokens as f64 * 0.75) as usize;
    if word_count == 0 {
        return drafts;
    }

    let starts: Vec<usize> = drafts
        .iter()
        .enumerate()
        .map(|(i, draft)| {
            let Some(previous) = i.checked_sub(1).and_then(|p| drafts.get(p)) else {
                return draft.span.start;
            };
            if previous.section != draft.section {
                return draft.span.start;
            }
            let words = word_spans(source, previous.span);
            if words.len() <= word_count {
                return draft.span.start;
            }
            words
                .get(words.len() - word_count)
                .map_or(draft.span.start, |w| w.start.min(draft.span.start))
        })
        .collect();

    drafts
        .into_iter()
        .zip(starts)
        .map(|(draft, start)| Draft {
            span: Span::new(start, draft.span.end),
            ..draft
        })
        .collect()
}

/// Estimate token count using a simple heuristic
/// This is a rough approximation - actual tokenization would be more accurate
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    // Add extra tokens for punctuation and special characters
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
