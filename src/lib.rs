//! # tokenslabs
//!
//! Token-budgeted text chunking for retrieval-augmented generation (RAG).
//!
//! ## The Problem
//!
//! Language models have context windows measured in tokens, not characters.
//! Documents don't fit. You need to split them into chunks small enough to
//! embed and retrieve, but large enough to preserve meaning, and "small
//! enough" is only meaningful relative to the tokenizer that will read them.
//!
//! Every chunker here measures its budget with a pluggable [`Tokenizer`] and
//! reports exact byte offsets into the source:
//!
//! ```text
//! &text[chunk.start..chunk.end] == chunk.text
//! ```
//!
//! ## Chunking Strategies
//!
//! ### Token Windows (Baseline)
//!
//! ```text
//! chunk_size = 4, overlap = 1
//!
//! "abcdefghij" -> "abcd" [0..4]  "defg" [3..7]  "ghij" [6..10]
//! ```
//!
//! **When to use**: Homogeneous content, baseline comparisons.
//! **Weakness**: Ignores linguistic boundaries.
//!
//! ### Sentence Packing
//!
//! Detect sentences, then pack as many as fit the budget. Trailing
//! sentences can be repeated in the next chunk as overlap.
//!
//! **When to use**: Prose, articles, documentation.
//!
//! ### Recursive
//!
//! ```text
//! Levels: ["\n\n", "\n", ". ", whitespace, graphemes]
//!
//! 1. Split on "\n\n" (paragraphs), merge neighbours that fit together
//! 2. Any piece > chunk_size? Split that piece on "\n" (lines)
//! 3. Still too large? Sentences, then words
//! 4. Last resort: grapheme clusters
//! ```
//!
//! **When to use**: General-purpose, mixed content. The sweet spot for most
//! RAG applications.
//!
//! ### Semantic
//!
//! Embed sentence windows, split where similarity between neighbours drops.
//!
//! ```text
//! Similarities: [0.9, 0.1, 0.85]
//!                     ↑ topic shift
//! Chunks: [S1, S2] | [S3, S4]
//! ```
//!
//! ### Late
//!
//! Recursive boundaries plus contextual embeddings pooled from one
//! whole-document embedding pass.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tokenslabs::{Chunker, RecursiveChunker, SentenceChunker, TokenChunker, WordTokenizer};
//!
//! let text = "The quick brown fox jumps over the lazy dog. \
//!             Pack my box with five dozen liquor jugs.";
//! let tokenizer = Arc::new(WordTokenizer::new());
//!
//! // Token windows, 8 tokens with 2 overlapping
//! let chunks = TokenChunker::new(tokenizer.clone(), 8, 2_usize).unwrap().chunk(text).unwrap();
//!
//! // Sentence packing
//! let chunks = SentenceChunker::new(tokenizer.clone(), 12, 0_usize).unwrap().chunk(text).unwrap();
//!
//! // Recursive with the default prose rules
//! let chunks = RecursiveChunker::prose(tokenizer, 12).unwrap().chunk(text).unwrap();
//! assert!(chunks.iter().all(|c| c.token_count <= 12));
//! ```
//!
//! ## Providers
//!
//! | Seam | Sync | Built in |
//! |------|------|----------|
//! | [`Tokenizer`] | yes | [`CharacterTokenizer`], [`WordTokenizer`], HuggingFace (`tokenizers` feature) |
//! | [`Embeddings`] | async | `FastEmbedder` (`fastembed` feature) |
//! | [`TokenEmbeddings`] | async | [`TokenizerAligned`] over any [`TokenVectorModel`] |
//!
//! Async calls take a [`CancellationToken`](tokio_util::sync::CancellationToken).
//! A cancelled call returns [`Error::Cancelled`] and no chunks.
//!
//! ## Post-processing
//!
//! A [`Refinery`] maps `Vec<Chunk>` to `Vec<Chunk>`. [`OverlapRefinery`]
//! moves chunk starts backwards until neighbours share a minimum number of
//! tokens.
//!
//! ## Performance Considerations
//!
//! | Strategy | Tokenizer calls | Provider calls |
//! |----------|-----------------|----------------|
//! | Token | 1 encode, 1-2 batched decodes | 0 |
//! | Sentence | 1 batched count + 1 per chunk | 0 |
//! | Recursive | 1 batched count per level + merges | 0 |
//! | Semantic | as Sentence | 1 batched embed |
//! | Late | as Recursive | 1 document embed |

mod budget;
mod chunk;
mod embeddings;
mod error;
mod late;
mod recursive;
mod refinery;
mod rules;
mod semantic;
mod sentence;
mod token;
mod tokenizer;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use budget::{Overlap, TokenBudget};
pub use chunk::{Chunk, Sentence};
#[cfg(feature = "fastembed")]
pub use embeddings::FastEmbedder;
pub use embeddings::{Embeddings, TokenEmbeddings, TokenSpan, TokenVectorModel, TokenizerAligned};
pub use error::{Error, Result};
pub use late::{LateChunker, LateChunkingPooler};
pub use recursive::RecursiveChunker;
pub use refinery::{OverlapRefinery, Refinery};
pub use rules::{Attach, RecursiveLevel, RecursiveRules, Split};
pub use semantic::{SemanticChunker, SplitThreshold};
pub use sentence::{
    HeuristicSentenceSplitter, SentenceChunker, SentenceSplitter, UnicodeSentenceSplitter,
};
pub use token::TokenChunker;
pub use tokenizer::{CharacterTokenizer, Tokenizer, WordTokenizer};

/// A synchronous text chunking strategy.
///
/// Implemented by the chunkers that need nothing but a tokenizer:
///
/// ```rust
/// use std::sync::Arc;
/// use tokenslabs::{CharacterTokenizer, Chunk, Chunker, RecursiveChunker, TokenChunker};
///
/// fn chunk_document(chunker: &dyn Chunker, text: &str) -> Vec<Chunk> {
///     chunker.chunk(text).unwrap()
/// }
///
/// let tok = Arc::new(CharacterTokenizer);
/// let token = TokenChunker::new(tok.clone(), 100, 20_usize).unwrap();
/// let recursive = RecursiveChunker::prose(tok, 100).unwrap();
///
/// let text = "Hello world. This is a test.";
/// assert_eq!(chunk_document(&token, text).len(), 1);
/// assert_eq!(chunk_document(&recursive, text).len(), 1);
/// ```
pub trait Chunker: Send + Sync {
    /// Split text into chunks, in source order.
    ///
    /// Each [`Chunk`] carries its text, byte offsets, and token count.
    fn chunk(&self, text: &str) -> Result<Vec<Chunk>>;

    /// Chunk several texts. Fails on the first error.
    fn chunk_batch(&self, texts: &[&str]) -> Result<Vec<Vec<Chunk>>> {
        texts.iter().map(|t| self.chunk(t)).collect()
    }
}

/// A cancellable chunking strategy, implemented by every chunker.
///
/// Lets token, sentence, recursive, semantic, and late chunkers sit behind
/// one `dyn AsyncChunker`.
#[async_trait]
pub trait AsyncChunker: Send + Sync {
    /// Split text into chunks, observing `cancel` at each provider call.
    async fn chunk_async(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<Chunk>>;
}
