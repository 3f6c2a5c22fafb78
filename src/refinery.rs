//! Post-processing passes over finished chunk sequences.
//!
//! A [`Refinery`] takes the output of any chunker and returns the same
//! shape, so passes compose into a linear chain:
//!
//! ```text
//! text -> chunker -> [Chunk] -> refinery -> [Chunk] -> refinery -> ...
//! ```
//!
//! ## Overlap Refinement
//!
//! Retrieval suffers at chunk boundaries: a fact split across two chunks is
//! complete in neither. [`OverlapRefinery`] makes every right-hand chunk
//! start a little earlier, so it repeats the tail of its left neighbour:
//!
//! ```text
//! min_overlap = 2 (characters as tokens)
//!
//! before:  ["aaaa ", "bbbb ", "cccc"]
//! after:   ["aaaa ", "a bbbb ", "b cccc"]
//!                     ^^         ^^
//! ```
//!
//! Chunk count never changes, only right-hand boundaries move, and only
//! backwards. The extension is capped at the start of the left chunk.

use std::sync::Arc;

use crate::{Chunk, Error, Result, Tokenizer};

/// A post-processing pass over a chunk sequence.
pub trait Refinery: Send + Sync {
    /// Refine `chunks`, which must be sorted by start offset.
    fn refine(&self, chunks: Vec<Chunk>) -> Result<Vec<Chunk>>;
}

/// Extends chunk starts backwards until neighbours share `min_overlap` tokens.
///
/// The repeated region is always a run of whole trailing tokens of the left
/// chunk: the new start is the decoded length of the tokens before them.
///
/// Idempotent: refining an already-compliant sequence returns it unchanged.
/// Chunks whose text changes lose their `embedding`, since it no longer
/// describes the text.
///
/// ```rust
/// use std::sync::Arc;
/// use tokenslabs::{CharacterTokenizer, Chunk, OverlapRefinery, Refinery};
///
/// let chunks = vec![Chunk::new("hello ", 0, 6, 6), Chunk::new("world", 6, 11, 5)];
/// let refinery = OverlapRefinery::new(Arc::new(CharacterTokenizer), 3).unwrap();
/// let refined = refinery.refine(chunks).unwrap();
///
/// assert_eq!(refined[1].text, "lo world");
/// assert_eq!(refined[1].start, 3);
/// assert_eq!(refined[1].token_count, 8);
/// ```
#[derive(Clone)]
pub struct OverlapRefinery {
    tokenizer: Arc<dyn Tokenizer>,
    min_overlap: usize,
    max_tokens: Option<usize>,
}

impl OverlapRefinery {
    /// Create a refinery requiring `min_overlap` shared tokens.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if `min_overlap == 0`.
    pub fn new(tokenizer: Arc<dyn Tokenizer>, min_overlap: usize) -> Result<Self> {
        if min_overlap == 0 {
            return Err(Error::config("min_overlap must be > 0"));
        }
        Ok(Self {
            tokenizer,
            min_overlap,
            max_tokens: None,
        })
    }

    /// Never grow a chunk past `max_tokens`.
    ///
    /// An extension that would overflow is shrunk one token at a time until
    /// the recount fits, and a warning is logged when the shared region ends
    /// up below `min_overlap`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if `max_tokens <= min_overlap`.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Result<Self> {
        if max_tokens <= self.min_overlap {
            return Err(Error::config(format!(
                "max_tokens ({max_tokens}) must exceed min_overlap ({})",
                self.min_overlap
            )));
        }
        self.max_tokens = Some(max_tokens);
        Ok(self)
    }

    /// The required overlap in tokens.
    #[must_use]
    pub fn min_overlap(&self) -> usize {
        self.min_overlap
    }

    /// The ceiling on refined chunk size, if any.
    #[must_use]
    pub fn max_tokens(&self) -> Option<usize> {
        self.max_tokens
    }

    /// Return `right`, extended backwards into `left` if they share too little.
    fn extend(&self, left: &Chunk, right: Chunk) -> Result<Chunk> {
        if right.start < left.start {
            return Err(Error::config("chunks must be sorted by start offset"));
        }
        if right.start > left.end {
            return Err(Error::NonContiguous {
                left_end: left.end,
                right_start: right.start,
            });
        }
        if left.text.len() != left.end - left.start {
            return Err(Error::config(format!(
                "chunk text does not match its span {}..{}",
                left.start, left.end
            )));
        }

        // Positions relative to the left chunk.
        let limit = right.start - left.start;
        let shared_end = left.end.min(right.end) - left.start;
        if limit == 0 {
            return Ok(right);
        }

        let (Some(prefix), Some(_)) = (left.text.get(..limit), left.text.get(..shared_end)) else {
            return Err(Error::config("chunk boundary is not a char boundary"));
        };

        let shared = if limit < shared_end {
            self.tokenizer.count_tokens(&left.text[limit..shared_end])?
        } else {
            0
        };
        if shared >= self.min_overlap {
            return Ok(right);
        }

        // Re-prepend the trailing tokens of the left chunk, taking more until
        // the shared region recounts to the threshold.
        let ids = self.tokenizer.encode(prefix)?;
        let mut taken = (self.min_overlap - shared).min(ids.len());
        let mut p = self.token_boundary(prefix, &ids, taken)?;
        while p > 0 && self.tokenizer.count_tokens(&left.text[p..shared_end])? < self.min_overlap {
            taken += 1;
            p = self.token_boundary(prefix, &ids, taken)?;
        }

        let mut extended = self.joined(left, &right, p)?;
        if let Some(max) = self.max_tokens {
            if extended.token_count > max {
                let required = taken;
                let mut fitted = None;
                while taken > 1 {
                    taken -= 1;
                    let candidate = self.joined(left, &right, self.token_boundary(prefix, &ids, taken)?)?;
                    if candidate.token_count <= max {
                        fitted = Some(candidate);
                        break;
                    }
                }
                tracing::warn!(
                    start = right.start,
                    end = right.end,
                    tokens = extended.token_count,
                    max_tokens = max,
                    required,
                    kept = fitted.as_ref().map_or(0, |_| taken),
                    "overlap reduced to stay within max_tokens"
                );
                match fitted {
                    Some(candidate) => extended = candidate,
                    None => return Ok(right),
                }
            }
        }

        tracing::debug!(
            from = right.start,
            to = extended.start,
            tokens = extended.token_count,
            "extended chunk start for overlap"
        );
        Ok(extended)
    }

    /// Byte position in `prefix` where its last `taken` tokens begin.
    ///
    /// Measured as the decoded length of the tokens before them, floored to a
    /// char boundary so a lossy decoder can never produce an invalid slice.
    fn token_boundary(&self, prefix: &str, ids: &[u32], taken: usize) -> Result<usize> {
        if taken >= ids.len() {
            return Ok(0);
        }
        let mut p = self.tokenizer.decode(&ids[..ids.len() - taken])?.len().min(prefix.len());
        while !prefix.is_char_boundary(p) {
            p -= 1;
        }
        Ok(p)
    }

    /// `right` with its start moved back to `p` (relative to `left.start`).
    fn joined(&self, left: &Chunk, right: &Chunk, p: usize) -> Result<Chunk> {
        let limit = right.start - left.start;
        let mut text = String::with_capacity(limit - p + right.text.len());
        text.push_str(&left.text[p..limit]);
        text.push_str(&right.text);
        let token_count = self.tokenizer.count_tokens(&text)?;
        Ok(Chunk {
            text,
            start: left.start + p,
            end: right.end,
            token_count,
            embedding: None,
        })
    }
}

impl Refinery for OverlapRefinery {
    fn refine(&self, chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        let mut out: Vec<Chunk> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let chunk = match out.last() {
                Some(left) => self.extend(left, chunk)?,
                None => chunk,
            };
            out.push(chunk);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for OverlapRefinery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlapRefinery")
            .field("min_overlap", &self.min_overlap)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}
