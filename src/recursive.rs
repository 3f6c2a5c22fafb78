//! Recursive splitting under a token budget.
//!
//! Tries progressively finer levels until every piece fits.
//!
//! ## The Algorithm
//!
//! Given the default rules and `chunk_size = 100` tokens:
//!
//! ```text
//! 1. Split on "\n\n" (paragraphs)
//! 2. Pieces that fit are merged forward while the merged text still fits
//! 3. Each piece > 100 tokens is split again on "\n" (lines)
//! 4. ... then on ". " (sentences), then on whitespace (words)
//! 5. Last resort: grapheme clusters. A single grapheme that is still too
//!    large is emitted as is; there is nothing smaller to split into.
//! ```
//!
//! Every recursion narrows the span or reaches single graphemes, so the
//! walk terminates.
//!
//! ## Counting
//!
//! Counting is never assumed additive. A merged group is recounted as one
//! string before it is accepted:
//!
//! ```text
//! pieces:  ["Para ", "two ", "is "]     counts  [2, 2, 2]
//! merge:   count("Para two ")  = 3      <- recounted, not 2 + 2
//! ```
//!
//! ## Offsets
//!
//! Offsets are carried down the recursion (`offset` of the piece inside the
//! original text plus the range inside the piece), so chunk positions never
//! depend on searching for text that might repeat.
//!
//! ## Overlap
//!
//! Overlap is not applied per level. When configured with
//! [`RecursiveChunker::with_min_overlap`], pieces are packed to
//! `chunk_size - overlap` tokens and an [`OverlapRefinery`] pass runs once
//! over the complete top-level result. The refinery is capped at
//! `chunk_size`, so a tokenizer whose counts grow when pieces are joined gets
//! a smaller overlap (and a warning) rather than an oversized chunk.

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    AsyncChunker, Chunk, Chunker, Error, OverlapRefinery, RecursiveRules, Refinery, Result,
    TokenBudget, Tokenizer,
};

/// Recursive hierarchical splitter.
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
/// use tokenslabs::{CharacterTokenizer, Chunker, RecursiveChunker};
///
/// let chunker = RecursiveChunker::prose(Arc::new(CharacterTokenizer), 20).unwrap();
/// let text = "Para one.\n\nPara two is longer and needs splitting.";
/// let chunks = chunker.chunk(text).unwrap();
///
/// assert_eq!(chunks[0].text, "Para one.\n\n");
/// assert!(chunks.iter().all(|c| c.token_count <= 20));
/// let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
/// assert_eq!(joined, text);
/// ```
#[derive(Clone)]
pub struct RecursiveChunker {
    tokenizer: Arc<dyn Tokenizer>,
    rules: Arc<RecursiveRules>,
    budget: TokenBudget,
    min_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new recursive chunker.
    ///
    /// # Arguments
    ///
    /// * `tokenizer` - Tokenizer the budget is measured in
    /// * `rules` - Split hierarchy, coarsest first
    /// * `chunk_size` - Maximum tokens per chunk
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if `chunk_size == 0`.
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        rules: impl Into<Arc<RecursiveRules>>,
        chunk_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            tokenizer,
            rules: rules.into(),
            budget: TokenBudget::new(chunk_size)?,
            min_overlap: 0,
        })
    }

    /// Create a chunker with the default prose rules.
    pub fn prose(tokenizer: Arc<dyn Tokenizer>, chunk_size: usize) -> Result<Self> {
        Self::new(tokenizer, RecursiveRules::default(), chunk_size)
    }

    /// Create a chunker with Markdown rules.
    pub fn markdown(tokenizer: Arc<dyn Tokenizer>, chunk_size: usize) -> Result<Self> {
        Self::new(tokenizer, RecursiveRules::markdown(), chunk_size)
    }

    /// Ensure adjacent chunks share at least `tokens` tokens.
    ///
    /// Applied once to the finished result, never per level.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if `tokens >= chunk_size`.
    pub fn with_min_overlap(mut self, tokens: usize) -> Result<Self> {
        self.budget = self.budget.with_overlap(tokens)?;
        self.min_overlap = tokens;
        Ok(self)
    }

    /// The split hierarchy.
    #[must_use]
    pub fn rules(&self) -> &RecursiveRules {
        &self.rules
    }

    /// The validated budget.
    #[must_use]
    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    /// Chunk `text`, observing `cancel` at every recursion level.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] if `cancel` fires; tokenizer errors propagate.
    pub fn chunk_with_cancel(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<Chunk>> {
        if text.is_empty() {
            return Ok(vec![]);
        }

        let mut chunks = Vec::new();
        self.split_at_level(text, 0, 0, cancel, &mut chunks)?;

        if self.min_overlap > 0 {
            chunks = OverlapRefinery::new(self.tokenizer.clone(), self.min_overlap)?
                .with_max_tokens(self.budget.chunk_size())?
                .refine(chunks)?;
        }

        tracing::debug!(
            strategy = "recursive",
            bytes = text.len(),
            levels = self.rules.len(),
            chunks = chunks.len(),
            "chunked text"
        );
        Ok(chunks)
    }

    /// Split `piece` (located at `offset` in the original) at `level`.
    fn split_at_level(
        &self,
        piece: &str,
        offset: usize,
        level: usize,
        cancel: &CancellationToken,
        out: &mut Vec<Chunk>,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let Some(rule) = self.rules.get(level) else {
            return self.emit_oversized(piece, offset, out);
        };
        let is_last = level + 1 >= self.rules.len();

        let ranges = rule.split(piece);
        if ranges.len() == 1 && !is_last {
            // Nothing to split on here.
            return self.split_at_level(piece, offset, level + 1, cancel, out);
        }

        tracing::trace!(level, offset, pieces = ranges.len(), "split level");

        let texts: Vec<&str> = ranges.iter().map(|r| &piece[r.clone()]).collect();
        let counts = self.tokenizer.count_tokens_batch(&texts)?;

        let mut group: Option<(Range<usize>, usize)> = None;

        for (range, count) in ranges.into_iter().zip(counts) {
            if !self.fits(count) {
                if let Some((g, gc)) = group.take() {
                    out.push(self.make_chunk(piece, offset, g, gc));
                }
                if is_last {
                    self.emit_oversized(&piece[range.clone()], offset + range.start, out)?;
                } else {
                    self.split_at_level(
                        &piece[range.clone()],
                        offset + range.start,
                        level + 1,
                        cancel,
                        out,
                    )?;
                }
                continue;
            }

            group = Some(match group.take() {
                None => (range, count),
                Some((g, gc)) => {
                    let merged = g.start..range.end;
                    let merged_count = self.tokenizer.count_tokens(&piece[merged.clone()])?;
                    if self.fits(merged_count) {
                        (merged, merged_count)
                    } else {
                        out.push(self.make_chunk(piece, offset, g, gc));
                        (range, count)
                    }
                }
            });
        }

        if let Some((g, gc)) = group {
            out.push(self.make_chunk(piece, offset, g, gc));
        }
        Ok(())
    }

    /// Pieces leave room for the overlap added afterwards.
    fn fits(&self, tokens: usize) -> bool {
        tokens <= self.budget.step()
    }

    fn make_chunk(&self, piece: &str, offset: usize, range: Range<usize>, count: usize) -> Chunk {
        Chunk::new(
            &piece[range.clone()],
            offset + range.start,
            offset + range.end,
            count,
        )
    }

    fn emit_oversized(&self, piece: &str, offset: usize, out: &mut Vec<Chunk>) -> Result<()> {
        let count = self.tokenizer.count_tokens(piece)?;
        tracing::warn!(
            start = offset,
            end = offset + piece.len(),
            tokens = count,
            chunk_size = self.budget.chunk_size(),
            "emitting oversized atomic chunk"
        );
        out.push(Chunk::new(piece, offset, offset + piece.len(), count));
        Ok(())
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, text: &str) -> Result<Vec<Chunk>> {
        self.chunk_with_cancel(text, &CancellationToken::new())
    }
}

#[async_trait]
impl AsyncChunker for RecursiveChunker {
    async fn chunk_async(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<Chunk>> {
        self.chunk_with_cancel(text, cancel)
    }
}

impl std::fmt::Debug for RecursiveChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursiveChunker")
            .field("chunk_size", &self.budget.chunk_size())
            .field("levels", &self.rules.len())
            .field("min_overlap", &self.min_overlap)
            .finish_non_exhaustive()
    }
}
