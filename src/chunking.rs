use crate::config::ChunkingConfig;
use crate::document::{Document, DocumentMetadata};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Position of a chunk inside its source document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    /// Character offset of `content` in the original document
    pub start_index: usize,
}

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
    /// Leading characters of `content` repeated from the previous chunk
    pub overlap: usize,
}

impl Chunk {
    /// The part of `content` not shared with the previous chunk
    pub fn fresh_text(&self) -> &str {
        let start = self
            .content
            .char_indices()
            .nth(self.overlap)
            .map(|(i, _)| i)
            .unwrap_or(self.content.len());
        &self.content[start..]
    }
}

/// Recursive character splitter with fixed-size overlap.
///
/// Pieces are produced by splitting on the configured separators, most
/// preferred first, and then merged greedily. Each chunk after the first
/// repeats the tail of its predecessor. Sizes are counted in characters.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    config: ChunkingConfig,
}

impl TextSplitter {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(TextSplitter { config })
    }

    /// Split every document, keeping document order
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        documents
            .iter()
            .flat_map(|document| self.split_document(document))
            .collect()
    }

    pub fn split_document(&self, document: &Document) -> Vec<Chunk> {
        self.split_text(&document.content, &document.metadata)
    }

    pub fn split_text(&self, text: &str, metadata: &DocumentMetadata) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        self.split_pieces(text, &self.config.separators, &mut pieces);
        let bodies = self.merge_pieces(&pieces);

        let mut chunks: Vec<Chunk> = Vec::with_capacity(bodies.len());
        // (byte start of previous chunk content, char start of current body)
        let mut previous_start = 0;
        let mut body_char_start = 0;

        for (body_start, body_end) in bodies {
            let content_start = if chunks.is_empty() {
                body_start
            } else {
                tail_start(text, previous_start, body_start, self.config.overlap)
            };
            let overlap = char_len(&text[content_start..body_start]);

            chunks.push(Chunk {
                content: text[content_start..body_end].to_string(),
                metadata: ChunkMetadata {
                    source: metadata.source.clone(),
                    start_index: body_char_start - overlap,
                },
                overlap,
            });

            previous_start = content_start;
            body_char_start += char_len(&text[body_start..body_end]);
        }

        chunks
    }

    /// Room left for new text once the overlap prefix is accounted for
    fn body_budget(&self) -> usize {
        self.config.max_size - self.config.overlap
    }

    fn split_pieces<'a>(&self, text: &'a str, separators: &[String], out: &mut Vec<&'a str>) {
        if char_len(text) <= self.body_budget() {
            out.push(text);
            return;
        }

        let Some(position) = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep.as_str()))
        else {
            // indivisible under the configured separators
            out.push(text);
            return;
        };

        let separator = separators[position].as_str();
        let remaining = &separators[position + 1..];

        if separator.is_empty() {
            out.extend(
                text.char_indices()
                    .map(|(i, c)| &text[i..i + c.len_utf8()]),
            );
            return;
        }

        for part in text.split_inclusive(separator) {
            if char_len(part) <= self.body_budget() {
                out.push(part);
            } else {
                self.split_pieces(part, remaining, out);
            }
        }
    }

    /// Greedy merge of contiguous pieces into byte ranges of chunk bodies
    fn merge_pieces(&self, pieces: &[&str]) -> Vec<(usize, usize)> {
        let budget = self.body_budget();
        let mut bodies = Vec::new();
        let mut start = 0;
        let mut end = 0;
        let mut length = 0;

        for piece in pieces {
            let piece_length = char_len(piece);
            if length > 0 && length + piece_length > budget {
                bodies.push((start, end));
                start = end;
                length = 0;
            }
            end += piece.len();
            length += piece_length;
        }

        if end > start {
            bodies.push((start, end));
        }
        bodies
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte index where the last `n` characters of `text[start..end]` begin
fn tail_start(text: &str, start: usize, end: usize, n: usize) -> usize {
    if n == 0 {
        return end;
    }
    text[start..end]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| start + i)
        .unwrap_or(start)
}
