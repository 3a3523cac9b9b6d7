use groundwork_core::{GroundworkError, GroundworkResult};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;

/// Default soft limit on chunk length, in characters.
pub const DEFAULT_MAX_CHARS: usize = 512;

/// Sentence-aligned text chunker.
///
/// Sentences (UAX #29 boundaries) are packed greedily into chunks joined by a
/// single space. A chunk is closed as soon as the next sentence would push it
/// past `max_chars`. Sentences are never split, so one sentence longer than
/// the limit becomes a chunk of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_chars: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
        }
    }
}

impl Chunker {
    /// Create a chunker with the given soft limit. Zero is rejected.
    pub fn new(max_chars: usize) -> GroundworkResult<Self> {
        if max_chars == 0 {
            return Err(GroundworkError::Config(
                "chunk size limit must be at least 1 character".to_string(),
            ));
        }
        Ok(Self { max_chars })
    }

    /// Create a chunker from configuration.
    pub fn from_config(config: &ChunkingConfig) -> GroundworkResult<Self> {
        Self::new(config.max_chars)
    }

    /// The soft chunk length limit.
    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Split `text` into ordered, non-empty chunks.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut buffer = String::new();
        let mut buffer_chars = 0usize;

        for sentence in split_sentences(text) {
            let sentence_chars = sentence.chars().count();

            if buffer.is_empty() {
                buffer.push_str(sentence);
                buffer_chars = sentence_chars;
            } else if buffer_chars + 1 + sentence_chars > self.max_chars {
                chunks.push(std::mem::take(&mut buffer));
                buffer.push_str(sentence);
                buffer_chars = sentence_chars;
            } else {
                buffer.push(' ');
                buffer.push_str(sentence);
                buffer_chars += 1 + sentence_chars;
            }
        }

        if !buffer.is_empty() {
            chunks.push(buffer);
        }
        chunks
    }
}

/// Sentence boundaries with surrounding whitespace removed. Covers the whole
/// input: no non-whitespace character is dropped.
fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_sentence_bounds()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
