//! Error types for tokenslabs.

use std::fmt::Display;

/// Errors that can occur during chunking.
///
/// A failed call never returns partial chunks: either the whole sequence
/// is produced or one of these comes back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Rejected configuration (zero chunk size, overlap >= chunk size, empty rules).
    ///
    /// Raised by constructors, before any tokenizer or embedding call.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The tokenizer failed to encode, decode, or count.
    #[error("tokenization failed: {0}")]
    Tokenization(String),

    /// The embedding provider failed or returned a malformed response.
    #[error("embedding provider failed: {0}")]
    EmbeddingProvider(String),

    /// Token-position spans could not be reconciled with chunk spans.
    #[error("alignment failed: {0}")]
    Alignment(String),

    /// The caller cancelled the operation.
    #[error("chunking cancelled")]
    Cancelled,

    /// Adjacent chunks leave a gap that cannot be bridged without the source.
    #[error("chunks are not contiguous: left ends at {left_end}, right starts at {right_start}")]
    NonContiguous {
        /// End offset of the left chunk.
        left_end: usize,
        /// Start offset of the right chunk.
        right_start: usize,
    },
}

impl Error {
    /// Shorthand for [`Error::InvalidConfiguration`].
    pub fn config(msg: impl Display) -> Self {
        Self::InvalidConfiguration(msg.to_string())
    }

    /// Shorthand for [`Error::Tokenization`].
    pub fn tokenization(err: impl Display) -> Self {
        Self::Tokenization(err.to_string())
    }

    /// Shorthand for [`Error::EmbeddingProvider`].
    pub fn embedding(err: impl Display) -> Self {
        Self::EmbeddingProvider(err.to_string())
    }

    /// Shorthand for [`Error::Alignment`].
    pub fn alignment(msg: impl Display) -> Self {
        Self::Alignment(msg.to_string())
    }
}

/// Result type for tokenslabs operations.
pub type Result<T> = std::result::Result<T, Error>;
