//! Embedding provider seams.
//!
//! Two contracts are consumed:
//!
//! | Trait | Input | Output | Used by |
//! |-------|-------|--------|---------|
//! | [`Embeddings`] | batch of texts | one vector per text | [`SemanticChunker`](crate::SemanticChunker) |
//! | [`TokenEmbeddings`] | whole document | one [`TokenSpan`] per token | [`LateChunker`](crate::LateChunker) |
//!
//! Both are async: providers are usually remote or run a model, and every
//! call is raced against the caller's [`CancellationToken`].
//!
//! ## Alignment
//!
//! Models that hand back one vector per token id know nothing about byte
//! offsets. [`TokenizerAligned`] wraps such a [`TokenVectorModel`] and
//! rebuilds offsets from the tokenizer, decoding token by token and
//! tracking cumulative lengths:
//!
//! ```text
//! text:     "Hi there"
//! ids:      [17, 204]
//! decoded:  ["Hi", " there"]
//! spans:    [0..2, 2..8]
//! ```
//!
//! If the decoded pieces do not reproduce the source byte for byte, the
//! tokenizer is lossy and the call fails with [`Error::Alignment`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result, Tokenizer};

/// Text embedding provider.
#[async_trait]
pub trait Embeddings: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::embedding("provider returned no vectors"))
    }
}

#[async_trait]
impl<T: Embeddings + ?Sized> Embeddings for Arc<T> {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed(texts).await
    }
}

/// A contextual vector for one token of a document.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TokenSpan {
    /// Byte offset of the token's first byte.
    pub start: usize,
    /// Byte offset one past the token's last byte.
    pub end: usize,
    /// The token's vector.
    pub embedding: Vec<f32>,
}

impl TokenSpan {
    /// The byte span of this token.
    #[must_use]
    pub fn span(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

/// Whole-document embedding with token positions.
#[async_trait]
pub trait TokenEmbeddings: Send + Sync {
    /// Embed `text` in one pass, returning token spans in source order.
    async fn embed_with_alignment(&self, text: &str) -> Result<Vec<TokenSpan>>;
}

#[async_trait]
impl<T: TokenEmbeddings + ?Sized> TokenEmbeddings for Arc<T> {
    async fn embed_with_alignment(&self, text: &str) -> Result<Vec<TokenSpan>> {
        (**self).embed_with_alignment(text).await
    }
}

/// A model producing one contextual vector per token id.
#[async_trait]
pub trait TokenVectorModel: Send + Sync {
    /// Embed the full id sequence, one vector per id.
    async fn embed_tokens(&self, ids: &[u32]) -> Result<Vec<Vec<f32>>>;
}

/// [`TokenEmbeddings`] built from a [`TokenVectorModel`] and a [`Tokenizer`].
///
/// The tokenizer must be lossless per token; see the module docs.
pub struct TokenizerAligned<M> {
    model: M,
    tokenizer: Arc<dyn Tokenizer>,
}

impl<M: TokenVectorModel> TokenizerAligned<M> {
    /// Pair `model` with the tokenizer whose ids it consumes.
    pub fn new(model: M, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { model, tokenizer }
    }

    /// Byte span of every id in `ids`, reconstructed against `text`.
    fn align(&self, text: &str, ids: &[u32]) -> Result<Vec<std::ops::Range<usize>>> {
        let singles: Vec<Vec<u32>> = ids.iter().map(|&id| vec![id]).collect();
        let pieces = self.tokenizer.decode_batch(&singles)?;

        let mut spans = Vec::with_capacity(pieces.len());
        let mut offset = 0;
        for (i, piece) in pieces.iter().enumerate() {
            let end = offset + piece.len();
            if text.get(offset..end) != Some(piece.as_str()) {
                return Err(Error::alignment(format!(
                    "token {i} decodes to {piece:?}, which is not the source at byte {offset}"
                )));
            }
            spans.push(offset..end);
            offset = end;
        }
        if offset != text.len() {
            return Err(Error::alignment(format!(
                "decoded tokens cover {offset} of {} bytes",
                text.len()
            )));
        }
        Ok(spans)
    }
}

#[async_trait]
impl<M: TokenVectorModel> TokenEmbeddings for TokenizerAligned<M> {
    async fn embed_with_alignment(&self, text: &str) -> Result<Vec<TokenSpan>> {
        let ids = self.tokenizer.encode(text)?;
        let spans = self.align(text, &ids)?;
        let vectors = self.model.embed_tokens(&ids).await?;
        if vectors.len() != ids.len() {
            return Err(Error::embedding(format!(
                "expected {} token vectors, got {}",
                ids.len(),
                vectors.len()
            )));
        }

        Ok(spans
            .into_iter()
            .zip(vectors)
            .map(|(span, embedding)| TokenSpan {
                start: span.start,
                end: span.end,
                embedding,
            })
            .collect())
    }
}

impl<M> std::fmt::Debug for TokenizerAligned<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenizerAligned").finish_non_exhaustive()
    }
}

/// Local embeddings via fastembed (ONNX Runtime).
///
/// Requires the `fastembed` feature.
///
/// ```rust,ignore
/// use tokenslabs::FastEmbedder;
///
/// // BGE-small-en, 384 dimensions
/// let embedder = FastEmbedder::try_default()?;
/// ```
#[cfg(feature = "fastembed")]
pub struct FastEmbedder {
    model: fastembed::TextEmbedding,
    batch_size: Option<usize>,
}

#[cfg(feature = "fastembed")]
impl FastEmbedder {
    /// Wrap a loaded model.
    pub fn new(model: fastembed::TextEmbedding) -> Self {
        Self {
            model,
            batch_size: None,
        }
    }

    /// Load fastembed's default model.
    ///
    /// # Errors
    ///
    /// [`Error::EmbeddingProvider`] if the model fails to load.
    pub fn try_default() -> Result<Self> {
        let model =
            fastembed::TextEmbedding::try_new(Default::default()).map_err(Error::embedding)?;
        Ok(Self::new(model))
    }

    /// Set the model's inference batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

#[cfg(feature = "fastembed")]
#[async_trait]
impl Embeddings for FastEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.model
            .embed(texts.to_vec(), self.batch_size)
            .map_err(Error::embedding)
    }
}

#[cfg(feature = "fastembed")]
impl std::fmt::Debug for FastEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedder")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

/// Await `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Scale `v` to unit length. Zero vectors are left as is.
pub(crate) fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in v {
            *x /= norm;
        }
    }
}

/// Cosine similarity, normalizing both sides first.
///
/// Zero vectors have similarity 0 with everything.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= 1e-9 || norm_b <= 1e-9 {
        return 0.0;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x / norm_a) * (y / norm_b))
        .sum()
}
