//! Semantic chunking using embedding similarity.
//!
//! Splits text where topic changes, detected by drops in embedding similarity.
//!
//! ## The Idea
//!
//! Adjacent sentences about the same topic have similar embeddings.
//! When the topic changes, similarity drops. We split there.
//!
//! ```text
//! Sentences:     [S1] [S2] [S3] [S4]
//! Similarities:      0.9  0.1  0.85
//!                          ^
//!                     <= threshold 0.5: topic shift
//!
//! Result: Chunk 1 = [S1, S2], Chunk 2 = [S3, S4]
//! ```
//!
//! ## Windows
//!
//! Single sentences are noisy. With `window_size = w`, window `j` is the
//! concatenation of sentences `j..j+w`, and similarity `j` compares windows
//! `j` and `j + 1`. A drop at similarity `j` places the boundary before
//! sentence `j + (w + 1) / 2`, the middle of the pair.
//!
//! All windows are embedded in one batched provider call.
//!
//! ## Threshold Selection
//!
//! | Mode | Meaning |
//! |------|---------|
//! | `Absolute(0.5)` | Split where similarity <= 0.5 |
//! | `Percentile(10.0)` | Split at the lowest 10% of this document's similarities |
//!
//! Percentiles adapt to the document; absolute values are comparable across
//! documents but depend on the embedding model.
//!
//! ## Skip-and-Merge
//!
//! A noisy dip can separate two groups that belong together. With
//! `skip_window = k`, each group is compared with the next `k` groups past
//! its neighbour. When the similarity of their mean embeddings is above the
//! threshold and the combined text still fits the budget, everything in
//! between merges into one chunk:
//!
//! ```text
//! groups:   [A] [B] [A']        sim(A, A') = 0.92 > threshold
//! merged:   [A B A']            only if count(A B A') <= chunk_size
//! ```
//!
//! ## Budget
//!
//! Semantic boundaries are content-aware but the budget is still a ceiling:
//! a group over `chunk_size` tokens is split again by a
//! [`RecursiveChunker`] with the default prose rules.

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::embeddings::{cancellable, cosine_similarity};
use crate::sentence::{split_sentences, HeuristicSentenceSplitter};
use crate::{
    AsyncChunker, Chunk, Embeddings, Error, RecursiveChunker, Result, Sentence, SentenceSplitter,
    TokenBudget, Tokenizer,
};

/// Where similarity counts as a topic shift.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SplitThreshold {
    /// Split where similarity is `<=` this value, in `[-1, 1]`.
    Absolute(f32),
    /// Split where similarity is `<=` this percentile of the series, in `[0, 100]`.
    Percentile(f32),
}

impl Default for SplitThreshold {
    fn default() -> Self {
        Self::Absolute(0.5)
    }
}

impl SplitThreshold {
    fn validate(self) -> Result<Self> {
        match self {
            Self::Absolute(t) if (-1.0..=1.0).contains(&t) => Ok(self),
            Self::Percentile(p) if (0.0..=100.0).contains(&p) => Ok(self),
            Self::Absolute(t) => Err(Error::config(format!(
                "absolute threshold must be in [-1, 1], got {t}"
            ))),
            Self::Percentile(p) => Err(Error::config(format!(
                "percentile must be in [0, 100], got {p}"
            ))),
        }
    }

    /// The absolute cut-off for `similarities`.
    ///
    /// Percentiles interpolate linearly between the sorted values.
    fn resolve(self, similarities: &[f32]) -> f32 {
        match self {
            Self::Absolute(t) => t,
            Self::Percentile(p) => {
                let mut sorted = similarities.to_vec();
                sorted.sort_by(f32::total_cmp);
                let Some(&last) = sorted.last() else {
                    return f32::NEG_INFINITY;
                };
                let rank = p / 100.0 * (sorted.len() - 1) as f32;
                let lo = rank.floor() as usize;
                let hi = rank.ceil() as usize;
                match (sorted.get(lo), sorted.get(hi)) {
                    (Some(&a), Some(&b)) => a + (b - a) * (rank - lo as f32),
                    _ => last,
                }
            }
        }
    }
}

/// Semantic chunker using embedding similarity.
///
/// ## Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use tokenslabs::{FastEmbedder, SemanticChunker, SplitThreshold, WordTokenizer};
/// use tokio_util::sync::CancellationToken;
///
/// let chunker = SemanticChunker::new(
///     Arc::new(FastEmbedder::try_default()?),
///     Arc::new(WordTokenizer::new()),
///     256,
/// )?
/// .with_threshold(SplitThreshold::Percentile(10.0))?;
///
/// let text = "Intro to machine learning. ML is powerful. \
///             The weather today is sunny. It's warm outside.";
/// let chunks = chunker.chunk(text, &CancellationToken::new()).await?;
/// ```
#[derive(Clone)]
pub struct SemanticChunker {
    embeddings: Arc<dyn Embeddings>,
    tokenizer: Arc<dyn Tokenizer>,
    splitter: Arc<dyn SentenceSplitter>,
    budget: TokenBudget,
    threshold: SplitThreshold,
    window_size: usize,
    min_sentences_per_chunk: usize,
    min_characters_per_sentence: usize,
    skip_window: usize,
    fallback: RecursiveChunker,
}

impl SemanticChunker {
    /// Create a semantic chunker with an absolute threshold of 0.5.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if `chunk_size == 0`.
    pub fn new(
        embeddings: Arc<dyn Embeddings>,
        tokenizer: Arc<dyn Tokenizer>,
        chunk_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            fallback: RecursiveChunker::prose(tokenizer.clone(), chunk_size)?,
            embeddings,
            tokenizer,
            splitter: Arc::new(HeuristicSentenceSplitter::default()),
            budget: TokenBudget::new(chunk_size)?,
            threshold: SplitThreshold::default(),
            window_size: 1,
            min_sentences_per_chunk: 1,
            min_characters_per_sentence: 12,
            skip_window: 0,
        })
    }

    /// Set the split threshold.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if the value is out of range.
    pub fn with_threshold(mut self, threshold: SplitThreshold) -> Result<Self> {
        self.threshold = threshold.validate()?;
        Ok(self)
    }

    /// Embed windows of `size` consecutive sentences.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if `size == 0`.
    pub fn with_window_size(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::config("window_size must be > 0"));
        }
        self.window_size = size;
        Ok(self)
    }

    /// Require at least `min` sentences on each side of a split.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if `min == 0`.
    pub fn with_min_sentences(mut self, min: usize) -> Result<Self> {
        if min == 0 {
            return Err(Error::config("min_sentences_per_chunk must be > 0"));
        }
        self.min_sentences_per_chunk = min;
        Ok(self)
    }

    /// Merge sentence fragments shorter than `min` characters into the next one.
    #[must_use]
    pub fn with_min_characters(mut self, min: usize) -> Self {
        self.min_characters_per_sentence = min;
        self
    }

    /// Compare each group with up to `k` groups past its neighbour; `0` disables.
    #[must_use]
    pub fn with_skip_window(mut self, k: usize) -> Self {
        self.skip_window = k;
        self
    }

    /// Replace the boundary detector.
    #[must_use]
    pub fn with_splitter(mut self, splitter: Arc<dyn SentenceSplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    /// The validated budget.
    #[must_use]
    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    /// The split threshold.
    #[must_use]
    pub fn threshold(&self) -> SplitThreshold {
        self.threshold
    }

    /// Chunk `text`, making one batched embedding call.
    ///
    /// # Errors
    ///
    /// [`Error::EmbeddingProvider`] if the provider fails or returns the
    /// wrong number of vectors, [`Error::Cancelled`] if `cancel` fires.
    pub async fn chunk(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<Chunk>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let sentences = split_sentences(
            text,
            self.splitter.as_ref(),
            self.tokenizer.as_ref(),
            self.min_characters_per_sentence,
        )?;
        if sentences.is_empty() {
            return Ok(vec![]);
        }

        let n = sentences.len();
        let w = self.window_size.min(n);
        let num_windows = n - w + 1;

        let groups = if num_windows < 2 {
            vec![0..n]
        } else {
            let windows: Vec<String> = (0..num_windows)
                .map(|j| text[sentences[j].start..sentences[j + w - 1].end].to_string())
                .collect();
            let vectors = cancellable(cancel, self.embeddings.embed(&windows)).await?;
            check_vectors(&vectors, num_windows)?;

            let similarities: Vec<f32> = vectors
                .windows(2)
                .map(|pair| cosine_similarity(&pair[0], &pair[1]))
                .collect();
            let threshold = self.threshold.resolve(&similarities);
            tracing::trace!(windows = num_windows, threshold, "similarity series ready");

            let groups = self.group(&similarities, threshold, n, w);
            if self.skip_window > 0 {
                self.skip_and_merge(text, &sentences, groups, &vectors, threshold)?
            } else {
                groups
            }
        };

        let chunks = self.build_chunks(text, &sentences, &groups, cancel)?;
        tracing::debug!(
            strategy = "semantic",
            bytes = text.len(),
            sentences = n,
            groups = groups.len(),
            chunks = chunks.len(),
            "chunked text"
        );
        Ok(chunks)
    }

    /// Sentence index ranges between confirmed split points.
    fn group(&self, similarities: &[f32], threshold: f32, n: usize, w: usize) -> Vec<Range<usize>> {
        let min = self.min_sentences_per_chunk;
        let mut groups = Vec::new();
        let mut last = 0;

        for (j, &sim) in similarities.iter().enumerate() {
            if sim > threshold {
                continue;
            }
            let boundary = j + (w + 1) / 2;
            if boundary > last && boundary - last >= min && n - boundary >= min {
                groups.push(last..boundary);
                last = boundary;
            }
        }
        groups.push(last..n);
        groups
    }

    /// Merge groups separated by a dip when their means are similar.
    fn skip_and_merge(
        &self,
        text: &str,
        sentences: &[Sentence],
        mut groups: Vec<Range<usize>>,
        vectors: &[Vec<f32>],
        threshold: f32,
    ) -> Result<Vec<Range<usize>>> {
        let mut i = 0;
        while i + 2 < groups.len() {
            let left = group_embedding(vectors, &groups[i]);
            let last = (i + 1 + self.skip_window).min(groups.len() - 1);

            let mut merged = false;
            for j in i + 2..=last {
                let right = group_embedding(vectors, &groups[j]);
                if cosine_similarity(&left, &right) <= threshold {
                    continue;
                }
                let span = sentences[groups[i].start].start..sentences[groups[j].end - 1].end;
                if !self.budget.fits(self.tokenizer.count_tokens(&text[span])?) {
                    continue;
                }
                tracing::trace!(from = i, to = j, "skip-and-merge");
                groups[i].end = groups[j].end;
                groups.drain(i + 1..=j);
                merged = true;
                break;
            }
            if !merged {
                i += 1;
            }
        }
        Ok(groups)
    }

    fn build_chunks(
        &self,
        text: &str,
        sentences: &[Sentence],
        groups: &[Range<usize>],
        cancel: &CancellationToken,
    ) -> Result<Vec<Chunk>> {
        let spans: Vec<Range<usize>> = groups
            .iter()
            .map(|g| sentences[g.start].start..sentences[g.end - 1].end)
            .collect();
        let pieces: Vec<&str> = spans.iter().map(|s| &text[s.clone()]).collect();
        let counts = self.tokenizer.count_tokens_batch(&pieces)?;

        let mut chunks = Vec::with_capacity(spans.len());
        for ((span, piece), count) in spans.into_iter().zip(pieces).zip(counts) {
            if self.budget.fits(count) {
                chunks.push(Chunk::new(piece, span.start, span.end, count));
                continue;
            }
            // Oversized group: split under the budget, shifting offsets.
            for mut chunk in self.fallback.chunk_with_cancel(piece, cancel)? {
                chunk.start += span.start;
                chunk.end += span.start;
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }
}

fn check_vectors(vectors: &[Vec<f32>], expected: usize) -> Result<()> {
    if vectors.len() != expected {
        return Err(Error::embedding(format!(
            "expected {expected} vectors, got {}",
            vectors.len()
        )));
    }
    let dim = vectors.first().map_or(0, Vec::len);
    if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
        return Err(Error::embedding("vectors have inconsistent dimensions"));
    }
    Ok(())
}

/// Mean of the window vectors starting inside `group`.
///
/// Trailing groups in which no window starts use the last window.
fn group_embedding(vectors: &[Vec<f32>], group: &Range<usize>) -> Vec<f32> {
    let last = vectors.len() - 1;
    let lo = group.start.min(last);
    let hi = group.end.min(vectors.len()).max(lo + 1);
    let selected = &vectors[lo..hi];

    let mut mean = vec![0.0; selected[0].len()];
    for v in selected {
        for (m, x) in mean.iter_mut().zip(v) {
            *m += x;
        }
    }
    let count = selected.len() as f32;
    for m in &mut mean {
        *m /= count;
    }
    mean
}

#[async_trait]
impl AsyncChunker for SemanticChunker {
    async fn chunk_async(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<Chunk>> {
        self.chunk(text, cancel).await
    }
}

impl std::fmt::Debug for SemanticChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticChunker")
            .field("chunk_size", &self.budget.chunk_size())
            .field("threshold", &self.threshold)
            .field("window_size", &self.window_size)
            .field("min_sentences_per_chunk", &self.min_sentences_per_chunk)
            .field("skip_window", &self.skip_window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{CharacterTokenizer, WordTokenizer};

    /// Returns preset vectors in order and counts calls.
    struct Preset {
        vectors: Vec<Vec<f32>>,
        calls: AtomicUsize,
    }

    impl Preset {
        fn new(vectors: Vec<Vec<f32>>) -> Arc<Self> {
            Arc::new(Self {
                vectors,
                calls: AtomicUsize::new(0),
            })
        }

        /// Unit vectors whose consecutive cosines are `sims`.
        fn from_similarities(sims: &[f32]) -> Arc<Self> {
            let mut angle = 0.0_f32;
            let mut vectors = vec![vec![1.0, 0.0]];
            for s in sims {
                angle += s.acos();
                vectors.push(vec![angle.cos(), angle.sin()]);
            }
            Self::new(vectors)
        }
    }

    #[async_trait]
    impl Embeddings for Preset {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.vectors.iter().take(texts.len()).cloned().collect())
        }
    }

    struct Failing;

    #[async_trait]
    impl Embeddings for Failing {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::embedding("service unavailable"))
        }
    }

    const FOUR: &str = "Cats purr softly. Cats nap often. Stocks fell today. Markets were shaky.";

    fn words(embeddings: Arc<dyn Embeddings>, size: usize) -> SemanticChunker {
        SemanticChunker::new(embeddings, Arc::new(WordTokenizer::new()), size).unwrap()
    }

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[tokio::test]
    async fn test_splits_at_similarity_drop() {
        let provider = Preset::from_similarities(&[0.9, 0.1, 0.85]);
        let chunker = words(provider.clone(), 100);
        let chunks = chunker.chunk(FOUR, &CancellationToken::new()).await.unwrap();

        assert_eq!(
            texts(&chunks),
            ["Cats purr softly. Cats nap often. ", "Stocks fell today. Markets were shaky."]
        );
        assert_eq!(chunks[1].start, 34);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        for chunk in &chunks {
            assert_eq!(&FOUR[chunk.span()], chunk.text);
        }
    }

    #[tokio::test]
    async fn test_percentile_threshold() {
        let provider = Preset::from_similarities(&[0.9, 0.1, 0.85]);
        let chunker = words(provider, 100)
            .with_threshold(SplitThreshold::Percentile(0.0))
            .unwrap();
        let chunks = chunker.chunk(FOUR, &CancellationToken::new()).await.unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_percentile_interpolates() {
        let sims = [0.4, 0.1, 0.3, 0.2];
        assert!((SplitThreshold::Percentile(0.0).resolve(&sims) - 0.1).abs() < 1e-6);
        assert!((SplitThreshold::Percentile(50.0).resolve(&sims) - 0.25).abs() < 1e-6);
        assert!((SplitThreshold::Percentile(100.0).resolve(&sims) - 0.4).abs() < 1e-6);
        assert!((SplitThreshold::Absolute(0.7).resolve(&sims) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_validation() {
        let chunker = words(Arc::new(Failing), 10);
        assert!(chunker.clone().with_threshold(SplitThreshold::Absolute(1.5)).is_err());
        assert!(chunker.clone().with_threshold(SplitThreshold::Percentile(101.0)).is_err());
        assert!(chunker.clone().with_window_size(0).is_err());
        assert!(chunker.with_min_sentences(0).is_err());
    }

    #[tokio::test]
    async fn test_equal_similarity_is_a_peak() {
        let provider = Preset::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let text = "First sentence is here. Second sentence is here.";
        let chunks = words(provider, 100)
            .with_threshold(SplitThreshold::Absolute(0.0))
            .unwrap()
            .chunk(text, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[tokio::test]
    async fn test_single_window_skips_provider() {
        let provider = Preset::new(vec![]);
        let chunker = words(provider.clone(), 100);
        let chunks = chunker
            .chunk("Only one sentence here.", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(texts(&chunks), ["Only one sentence here."]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_window_size_moves_boundary() {
        // Windows: [S0 S1] [S1 S2] [S2 S3]; the dip between windows 1 and 2
        // places the boundary before sentence 1 + 1 = 2.
        let provider = Preset::from_similarities(&[0.9, 0.1]);
        let chunker = words(provider.clone(), 100).with_window_size(2).unwrap();
        let chunks = chunker.chunk(FOUR, &CancellationToken::new()).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text, "Stocks fell today. Markets were shaky.");
    }

    #[tokio::test]
    async fn test_min_sentences_suppresses_splits() {
        let provider = Preset::from_similarities(&[0.1, 0.9, 0.9]);
        let chunker = words(provider, 100).with_min_sentences(2).unwrap();
        let chunks = chunker.chunk(FOUR, &CancellationToken::new()).await.unwrap();
        assert_eq!(texts(&chunks), [FOUR]);
    }

    #[tokio::test]
    async fn test_skip_and_merge() {
        let text = "Cats purr softly. Stocks fell today. Cats nap often.";
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]];

        let plain = words(Preset::new(vectors.clone()), 100);
        let chunks = plain.chunk(text, &CancellationToken::new()).await.unwrap();
        assert_eq!(chunks.len(), 3);

        let merging = words(Preset::new(vectors.clone()), 100).with_skip_window(1);
        let chunks = merging.chunk(text, &CancellationToken::new()).await.unwrap();
        assert_eq!(texts(&chunks), [text]);

        // Merged text would exceed the budget, so the split stays.
        let tight = words(Preset::new(vectors), 6).with_skip_window(1);
        let chunks = tight.chunk(text, &CancellationToken::new()).await.unwrap();
        assert_eq!(chunks.len(), 3);
    }

    #[tokio::test]
    async fn test_oversized_group_uses_fallback() {
        let provider = Preset::new(vec![vec![1.0, 0.0], vec![1.0, 0.0]]);
        let chunker = SemanticChunker::new(provider, Arc::new(CharacterTokenizer), 10).unwrap();
        let text = "Cats purr softly. Cats nap often.";
        let chunks = chunker.chunk(text, &CancellationToken::new()).await.unwrap();

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.token_count <= 10));
        for chunk in &chunks {
            assert_eq!(&text[chunk.span()], chunk.text);
        }
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[tokio::test]
    async fn test_provider_errors_propagate() {
        let err = words(Arc::new(Failing), 100)
            .chunk(FOUR, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingProvider(_)));

        let short = Preset::new(vec![vec![1.0, 0.0]]);
        let err = words(short, 100)
            .chunk(FOUR, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingProvider(_)));
    }

    #[tokio::test]
    async fn test_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let provider = Preset::from_similarities(&[0.9, 0.1, 0.85]);
        let err = words(provider.clone(), 100).chunk(FOUR, &cancel).await.unwrap_err();
        assert_eq!(err, Error::Cancelled);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let chunker = words(Arc::new(Failing), 100);
        assert!(chunker.chunk("", &CancellationToken::new()).await.unwrap().is_empty());
        assert!(chunker.chunk(" \n ", &CancellationToken::new()).await.unwrap().is_empty());
    }
}
