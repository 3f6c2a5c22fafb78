//! Token budget configuration.
//!
//! ## The Problem
//!
//! Every chunker eventually asks one question: does this piece fit?
//!
//! ```text
//! fits(piece) := tokenizer.count_tokens(piece) <= chunk_size
//! ```
//!
//! The question is cheap to state and expensive to answer, because the
//! tokenizer may be a full BPE model. `TokenBudget` owns the arithmetic
//! around it (validation, overlap resolution, overflow checks) so the
//! chunkers only have to decide *what* to count.
//!
//! ## Overlap
//!
//! Overlap is given either as an absolute token count or as a fraction of
//! the chunk size:
//!
//! ```text
//! chunk_size = 512
//! Overlap::Tokens(64)     -> 64
//! Overlap::Fraction(0.1)  -> floor(51.2) = 51
//! ```
//!
//! The resolved overlap must stay strictly below the chunk size, otherwise a
//! sliding window would never advance.

/// Overlap between adjacent chunks.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Overlap {
    /// An absolute number of tokens.
    Tokens(usize),
    /// A fraction of the chunk size in `[0, 1)`.
    Fraction(f64),
}

impl Default for Overlap {
    fn default() -> Self {
        Self::Tokens(0)
    }
}

impl From<usize> for Overlap {
    fn from(tokens: usize) -> Self {
        Self::Tokens(tokens)
    }
}

impl From<f64> for Overlap {
    fn from(fraction: f64) -> Self {
        Self::Fraction(fraction)
    }
}

/// A validated chunk size plus resolved overlap, both in tokens.
///
/// # Examples
///
/// ```rust
/// use tokenslabs::{Overlap, TokenBudget};
///
/// let budget = TokenBudget::new(512).unwrap();
/// assert_eq!(budget.chunk_size(), 512);
/// assert_eq!(budget.overlap(), 0);
///
/// let budget = TokenBudget::new(512).unwrap().with_overlap(Overlap::Fraction(0.25)).unwrap();
/// assert_eq!(budget.overlap(), 128);
/// assert_eq!(budget.step(), 384);
///
/// assert!(TokenBudget::new(0).is_err());
/// assert!(TokenBudget::new(10).unwrap().with_overlap(10_usize).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    chunk_size: usize,
    overlap: usize,
}

impl TokenBudget {
    /// Create a budget with no overlap.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`](crate::Error::InvalidConfiguration) if `chunk_size == 0`.
    pub fn new(chunk_size: usize) -> crate::Result<Self> {
        if chunk_size == 0 {
            return Err(crate::Error::config("chunk size must be > 0"));
        }
        Ok(Self {
            chunk_size,
            overlap: 0,
        })
    }

    /// Set the overlap.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`](crate::Error::InvalidConfiguration) if the
    /// fraction is outside `[0, 1)` or the resolved overlap is `>= chunk_size`.
    pub fn with_overlap(self, overlap: impl Into<Overlap>) -> crate::Result<Self> {
        let tokens = match overlap.into() {
            Overlap::Tokens(n) => n,
            Overlap::Fraction(f) => {
                if !(0.0..1.0).contains(&f) {
                    return Err(crate::Error::config(format!(
                        "overlap fraction {f} must be in [0, 1)"
                    )));
                }
                (f * self.chunk_size as f64).floor() as usize
            }
        };
        if tokens >= self.chunk_size {
            return Err(crate::Error::config(format!(
                "overlap {tokens} must be < chunk size {}",
                self.chunk_size
            )));
        }
        Ok(Self {
            overlap: tokens,
            ..self
        })
    }

    /// Maximum tokens per chunk.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Resolved overlap in tokens.
    #[must_use]
    pub const fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between consecutive window starts.
    #[must_use]
    pub const fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Whether a piece of `tokens` tokens fits.
    #[must_use]
    pub const fn fits(&self, tokens: usize) -> bool {
        tokens <= self.chunk_size
    }

    /// Check if adding `additional` tokens to `current` would exceed the budget.
    ///
    /// This is an estimate for incremental packing: the packed text must
    /// still be recounted as a whole before it is accepted.
    #[must_use]
    pub fn would_overflow(&self, current: usize, additional: usize) -> bool {
        current.saturating_add(additional) > self.chunk_size
    }
}
