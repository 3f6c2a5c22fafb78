//! The Chunk and Sentence types: text with position and token metadata.

/// A chunk of text with its position in the original document.
///
/// ## Byte Offsets
///
/// `start` and `end` are byte offsets into the original text, not character
/// indices. This matches Rust's string slicing semantics:
///
/// ```rust
/// use tokenslabs::Chunk;
///
/// let text = "Hello, world!";
/// let chunk = Chunk::new("world", 7, 12, 1);
///
/// assert_eq!(&text[chunk.span()], chunk.text);
/// ```
///
/// ## Overlap Handling
///
/// When chunks overlap, adjacent chunks share some text:
///
/// ```text
/// Original: "The quick brown fox"
/// Chunk 0:  "The quick b"     [0..11]
/// Chunk 1:  "ck brown fox"    [8..19]  <- overlaps with chunk 0
///                ^
///            overlap region [8..11]
/// ```
///
/// `token_count` is always the tokenizer's count of `text`. Anything that
/// changes `text` recounts it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Chunk {
    /// The chunk text.
    pub text: String,
    /// Byte offset where this chunk starts in the original document.
    pub start: usize,
    /// Byte offset where this chunk ends (exclusive) in the original document.
    pub end: usize,
    /// Number of tokens in `text` according to the active tokenizer.
    pub token_count: usize,
    /// Contextual embedding, set by late chunking.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Create a new chunk without an embedding.
    #[must_use]
    pub fn new(text: impl Into<String>, start: usize, end: usize, token_count: usize) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            token_count,
            embedding: None,
        }
    }

    /// Attach an embedding.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// The length of this chunk in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Whether this chunk is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The byte span of this chunk in the original document.
    #[must_use]
    pub fn span(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

impl std::fmt::Display for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Chunk {{ span: {}..{}, len: {}, tokens: {} }}",
            self.start,
            self.end,
            self.len(),
            self.token_count
        )
    }
}

/// A sentence found by a [`SentenceSplitter`](crate::SentenceSplitter).
///
/// Sentences keep their trailing whitespace, so a run of consecutive
/// sentences is always a literal slice of the source.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sentence {
    /// The sentence text.
    pub text: String,
    /// Byte offset of the first byte.
    pub start: usize,
    /// Byte offset one past the last byte.
    pub end: usize,
    /// Number of tokens in `text`.
    pub token_count: usize,
}

impl Sentence {
    /// The byte span of this sentence in the original document.
    #[must_use]
    pub fn span(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_slices_source() {
        let text = "Hello, world!";
        let chunk = Chunk::new("world", 7, 12, 5);
        assert_eq!(&text[chunk.span()], "world");
        assert_eq!(chunk.len(), 5);
        assert!(chunk.embedding.is_none());
    }

    #[test]
    fn display_is_compact() {
        let chunk = Chunk::new("abc", 3, 6, 1).with_embedding(vec![1.0]);
        assert_eq!(chunk.to_string(), "Chunk { span: 3..6, len: 3, tokens: 1 }");
    }
}
