//! Sentence-based chunking.
//!
//! Splits text on sentence boundaries, then packs consecutive sentences
//! into chunks under a token budget.
//!
//! ## The Hard Part: Finding Sentences
//!
//! Sentence detection seems simple until you encounter:
//!
//! ```text
//! "Dr. Smith went to Washington D.C. on Jan. 15th."
//!     ^                          ^       ^
//!     Not a sentence end (abbreviation)
//! ```
//!
//! Two detectors are provided behind the [`SentenceSplitter`] trait:
//!
//! - [`HeuristicSentenceSplitter`] (default): terminators (`.`, `!`, `?`,
//!   `…`, CJK full stops), closing quotes and brackets, an abbreviation list,
//!   initialisms, and a lowercase-continuation lookahead.
//! - [`UnicodeSentenceSplitter`]: Unicode Standard Annex #29 segmentation.
//!
//! Neither is an NLP model. Both keep trailing whitespace inside the
//! sentence, so consecutive sentences always form a literal slice.
//!
//! ## Packing
//!
//! ```text
//! chunk_size = 10
//! sentences:  [S1: 4] [S2: 5] [S3: 6] [S4: 2]
//!
//! Chunk 0: S1 S2      (4 + 5 = 9;  + 6 would overflow)
//! Chunk 1: S3 S4      (6 + 2 = 8)
//! ```
//!
//! Packed text is recounted as a whole before it is accepted. A sentence
//! that alone exceeds the budget is emitted on its own, oversized, with a
//! warning; use [`RecursiveChunker`](crate::RecursiveChunker) when
//! sub-sentence splitting is needed.

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use unicode_segmentation::UnicodeSegmentation;

use crate::{AsyncChunker, Chunk, Chunker, Error, Overlap, Result, Sentence, TokenBudget, Tokenizer};

/// A pluggable sentence boundary detector.
pub trait SentenceSplitter: Send + Sync {
    /// Split `text` into contiguous, non-empty byte ranges covering it.
    fn split(&self, text: &str) -> Vec<Range<usize>>;
}

/// Sentence boundaries per UAX #29.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnicodeSentenceSplitter;

impl SentenceSplitter for UnicodeSentenceSplitter {
    fn split(&self, text: &str) -> Vec<Range<usize>> {
        text.split_sentence_bound_indices()
            .map(|(i, s)| i..i + s.len())
            .filter(|r| !r.is_empty())
            .collect()
    }
}

const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "mt", "vs", "etc", "inc", "ltd", "co",
    "corp", "dept", "fig", "vol", "approx", "jan", "feb", "mar", "apr", "jun", "jul", "aug",
    "sep", "sept", "oct", "nov", "dec",
];

/// Terminator-based boundary detection with abbreviation and quote lookahead.
///
/// ```rust
/// use tokenslabs::{HeuristicSentenceSplitter, SentenceSplitter};
///
/// let text = "Dr. Smith arrived. He said \"hi!\" Then he left.";
/// let spans = HeuristicSentenceSplitter::default().split(text);
/// let sentences: Vec<&str> = spans.into_iter().map(|r| &text[r]).collect();
/// assert_eq!(sentences, ["Dr. Smith arrived. ", "He said \"hi!\" ", "Then he left."]);
/// ```
#[derive(Debug, Clone)]
pub struct HeuristicSentenceSplitter {
    split_on_newlines: bool,
}

impl Default for HeuristicSentenceSplitter {
    fn default() -> Self {
        Self {
            split_on_newlines: true,
        }
    }
}

impl HeuristicSentenceSplitter {
    /// Treat line breaks as sentence boundaries (default `true`).
    #[must_use]
    pub fn with_newline_boundaries(mut self, enabled: bool) -> Self {
        self.split_on_newlines = enabled;
        self
    }

    fn is_terminator(c: char) -> bool {
        matches!(c, '.' | '!' | '?' | '…' | '。' | '！' | '？')
    }

    fn is_wide_terminator(c: char) -> bool {
        matches!(c, '。' | '！' | '？')
    }

    fn is_closer(c: char) -> bool {
        matches!(c, '"' | '\'' | '”' | '’' | ')' | ']' | '»')
    }

    /// Whether the word ending at byte `dot` is an abbreviation or initialism.
    fn is_abbreviation(text: &str, dot: usize) -> bool {
        let before = &text[..dot];
        let word_start = before
            .char_indices()
            .rev()
            .find(|(_, c)| !(c.is_alphabetic() || *c == '.'))
            .map_or(0, |(i, c)| i + c.len_utf8());
        let word = &before[word_start..];

        if word.is_empty() {
            return false;
        }
        // "D.C", "e.g", "U.S"
        if word.contains('.') {
            return true;
        }
        let mut chars = word.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.is_uppercase() {
                return true;
            }
        }
        let lower = word.to_lowercase();
        ABBREVIATIONS.contains(&lower.as_str())
    }
}

impl SentenceSplitter for HeuristicSentenceSplitter {
    fn split(&self, text: &str) -> Vec<Range<usize>> {
        if text.is_empty() {
            return vec![];
        }

        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let byte_at = |i: usize| chars.get(i).map_or(text.len(), |&(b, _)| b);
        let skip_ws = |mut j: usize| {
            while j < chars.len() && chars[j].1.is_whitespace() {
                j += 1;
            }
            j
        };

        let mut cuts = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            let (pos, c) = chars[i];

            if c == '\n' && self.split_on_newlines {
                let j = skip_ws(i + 1);
                cuts.push(byte_at(j));
                i = j;
                continue;
            }

            if !Self::is_terminator(c) {
                i += 1;
                continue;
            }

            let mut j = i + 1;
            while j < chars.len() && Self::is_terminator(chars[j].1) {
                j += 1;
            }
            while j < chars.len() && Self::is_closer(chars[j].1) {
                j += 1;
            }
            if j >= chars.len() {
                break;
            }

            let followed_by_space = chars[j].1.is_whitespace();
            if !followed_by_space && !Self::is_wide_terminator(chars[j - 1].1) {
                i = j;
                continue;
            }
            if c == '.' && j == i + 1 && Self::is_abbreviation(text, pos) {
                i = j;
                continue;
            }

            let k = skip_ws(j);
            if k < chars.len() && chars[k].1.is_lowercase() {
                i = j;
                continue;
            }
            cuts.push(byte_at(k));
            i = k;
        }

        let mut ranges = Vec::with_capacity(cuts.len() + 1);
        let mut start = 0;
        for cut in cuts {
            if cut > start && cut < text.len() {
                ranges.push(start..cut);
                start = cut;
            }
        }
        ranges.push(start..text.len());
        ranges
    }
}

/// Merge ranges shorter than `min_chars` characters into their successor
/// (the last one into its predecessor).
fn merge_short(text: &str, spans: Vec<Range<usize>>, min_chars: usize) -> Vec<Range<usize>> {
    if min_chars <= 1 {
        return spans;
    }

    let mut merged: Vec<Range<usize>> = Vec::with_capacity(spans.len());
    let mut pending: Option<Range<usize>> = None;

    for span in spans {
        let current = match pending.take() {
            Some(p) => p.start..span.end,
            None => span,
        };
        if text[current.clone()].chars().count() < min_chars {
            pending = Some(current);
        } else {
            merged.push(current);
        }
    }
    if let Some(rest) = pending {
        match merged.last_mut() {
            Some(last) => last.end = rest.end,
            None => merged.push(rest),
        }
    }
    merged
}

/// Split `text` into sentences with token counts.
///
/// Whitespace-only input yields no sentences.
pub(crate) fn split_sentences(
    text: &str,
    splitter: &dyn SentenceSplitter,
    tokenizer: &dyn Tokenizer,
    min_chars: usize,
) -> Result<Vec<Sentence>> {
    if text.trim().is_empty() {
        return Ok(vec![]);
    }

    let spans = merge_short(text, splitter.split(text), min_chars);
    let pieces: Vec<&str> = spans.iter().map(|r| &text[r.clone()]).collect();
    let counts = tokenizer.count_tokens_batch(&pieces)?;

    Ok(spans
        .into_iter()
        .zip(counts)
        .map(|(span, token_count)| Sentence {
            text: text[span.clone()].to_string(),
            start: span.start,
            end: span.end,
            token_count,
        })
        .collect())
}

/// Sentence-packing chunker.
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
/// use tokenslabs::{Chunker, SentenceChunker, WordTokenizer};
///
/// let chunker = SentenceChunker::new(Arc::new(WordTokenizer::new()), 4, 0_usize).unwrap();
/// let text = "First sentence here. Second one. Third sentence is longer.";
/// let chunks = chunker.chunk(text).unwrap();
///
/// assert_eq!(chunks[0].text, "First sentence here. ");
/// assert_eq!(chunks[1].text, "Second one. ");
/// ```
#[derive(Clone)]
pub struct SentenceChunker {
    tokenizer: Arc<dyn Tokenizer>,
    splitter: Arc<dyn SentenceSplitter>,
    budget: TokenBudget,
    min_sentences_per_chunk: usize,
    min_characters_per_sentence: usize,
}

impl SentenceChunker {
    /// Create a new sentence chunker.
    ///
    /// # Arguments
    ///
    /// * `tokenizer` - Tokenizer the budget is measured in
    /// * `chunk_size` - Maximum tokens per chunk
    /// * `overlap` - Tokens of trailing sentences repeated in the next chunk
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if `chunk_size == 0` or the overlap
    /// resolves to `>= chunk_size`.
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        chunk_size: usize,
        overlap: impl Into<Overlap>,
    ) -> Result<Self> {
        Ok(Self {
            tokenizer,
            splitter: Arc::new(HeuristicSentenceSplitter::default()),
            budget: TokenBudget::new(chunk_size)?.with_overlap(overlap)?,
            min_sentences_per_chunk: 1,
            min_characters_per_sentence: 12,
        })
    }

    /// Replace the boundary detector.
    #[must_use]
    pub fn with_splitter(mut self, splitter: Arc<dyn SentenceSplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    /// Require at least `min` sentences per chunk, even past the budget.
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

    /// The validated budget.
    #[must_use]
    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    /// Detect sentences in `text`.
    pub fn sentences(&self, text: &str) -> Result<Vec<Sentence>> {
        split_sentences(
            text,
            self.splitter.as_ref(),
            self.tokenizer.as_ref(),
            self.min_characters_per_sentence,
        )
    }

    /// First sentence index of the chunk after `[start, end)`.
    fn overlap_start(&self, sentences: &[Sentence], start: usize, end: usize) -> usize {
        let overlap = self.budget.overlap();
        if overlap == 0 || end >= sentences.len() {
            return end;
        }

        let mut tokens = 0;
        let mut k = end;
        while k > start + 1 && tokens + sentences[k - 1].token_count <= overlap {
            tokens += sentences[k - 1].token_count;
            k -= 1;
        }
        // Shrink until the next fresh sentence still fits.
        while k < end && self.budget.would_overflow(tokens, sentences[end].token_count) {
            tokens -= sentences[k].token_count;
            k += 1;
        }
        k
    }
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str) -> Result<Vec<Chunk>> {
        let sentences = self.sentences(text)?;
        if sentences.is_empty() {
            return Ok(vec![]);
        }

        let n = sentences.len();
        let min = self.min_sentences_per_chunk;
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < n {
            let mut end = start;
            let mut running = 0;
            while end < n {
                let taken = end - start;
                let next = sentences[end].token_count;
                if taken >= min && self.budget.would_overflow(running, next) {
                    break;
                }
                running += next;
                end += 1;
            }

            // Estimates are additive, the tokenizer is not.
            let (span, token_count) = loop {
                let span = sentences[start].start..sentences[end - 1].end;
                let count = self.tokenizer.count_tokens(&text[span.clone()])?;
                if self.budget.fits(count) || end - start <= min {
                    break (span, count);
                }
                end -= 1;
            };

            if !self.budget.fits(token_count) {
                tracing::warn!(
                    start = span.start,
                    end = span.end,
                    tokens = token_count,
                    chunk_size = self.budget.chunk_size(),
                    "emitting oversized sentence chunk"
                );
            }
            chunks.push(Chunk::new(&text[span.clone()], span.start, span.end, token_count));

            if end >= n {
                break;
            }
            start = self.overlap_start(&sentences, start, end);
        }

        tracing::debug!(
            strategy = "sentence",
            bytes = text.len(),
            sentences = n,
            chunks = chunks.len(),
            "chunked text"
        );
        Ok(chunks)
    }
}

#[async_trait]
impl AsyncChunker for SentenceChunker {
    async fn chunk_async(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<Chunk>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.chunk(text)
    }
}

impl std::fmt::Debug for SentenceChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentenceChunker")
            .field("chunk_size", &self.budget.chunk_size())
            .field("overlap", &self.budget.overlap())
            .field("min_sentences_per_chunk", &self.min_sentences_per_chunk)
            .field("min_characters_per_sentence", &self.min_characters_per_sentence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CharacterTokenizer, WordTokenizer};

    fn split(text: &str) -> Vec<&str> {
        HeuristicSentenceSplitter::default()
            .split(text)
            .into_iter()
            .map(|r| &text[r])
            .collect()
    }

    fn words(size: usize, overlap: usize) -> SentenceChunker {
        SentenceChunker::new(Arc::new(WordTokenizer::new()), size, overlap)
            .unwrap()
            .with_min_characters(0)
    }

    #[test]
    fn test_basic_sentences() {
        assert_eq!(
            split("Hello world. How are you? I am fine."),
            vec!["Hello world. ", "How are you? ", "I am fine."]
        );
    }

    #[test]
    fn test_abbreviations() {
        let text = "Dr. Smith went to Washington D.C. on Tuesday.";
        assert_eq!(split(text), vec![text]);
    }

    #[test]
    fn test_lowercase_continuation() {
        assert_eq!(split("It costs approx. ten dollars. Fine."), vec![
            "It costs approx. ten dollars. ",
            "Fine."
        ]);
        assert_eq!(split("Wait... what? No."), vec!["Wait... what? ", "No."]);
    }

    #[test]
    fn test_decimals_and_urls_do_not_split() {
        assert_eq!(split("Pi is 3.14159 roughly. See example.com now."), vec![
            "Pi is 3.14159 roughly. ",
            "See example.com now."
        ]);
    }

    #[test]
    fn test_newlines_are_boundaries() {
        assert_eq!(split("Title\n\nBody text."), vec!["Title\n\n", "Body text."]);
        let joined = HeuristicSentenceSplitter::default()
            .with_newline_boundaries(false)
            .split("Title\nBody.");
        assert_eq!(joined, vec![0..11]);
    }

    #[test]
    fn test_cjk_terminators() {
        assert_eq!(split("今日は晴れ。明日は雨。"), vec!["今日は晴れ。", "明日は雨。"]);
    }

    #[test]
    fn test_merge_short_fragments() {
        let text = "Hi. Yes. This is a longer sentence.";
        let spans = merge_short(text, HeuristicSentenceSplitter::default().split(text), 12);
        let merged: Vec<&str> = spans.into_iter().map(|r| &text[r]).collect();
        assert_eq!(merged, vec!["Hi. Yes. This is a longer sentence."]);
    }

    #[test]
    fn test_packing_respects_budget() {
        let text = "One two three. Four five. Six seven eight nine. Ten.";
        let chunks = words(7, 0).chunk(text).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, ["One two three. Four five. ", "Six seven eight nine. Ten."]);
        assert_eq!(chunks[0].token_count, 6);
        assert!(chunks.iter().all(|c| c.token_count <= 7));
    }

    #[test]
    fn test_reconstruction_without_overlap() {
        let text = "First. Second sentence! Third? Fourth one here.";
        let chunks = words(3, 0).chunk(text).unwrap();
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_overlap_repeats_trailing_sentence() {
        let text = "Aa bb. Cc dd. Ee ff. Gg hh.";
        let chunks = words(7, 3).chunk(text).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, ["Aa bb. Cc dd. ", "Cc dd. Ee ff. ", "Ee ff. Gg hh."]);
    }

    #[test]
    fn test_oversized_sentence_alone() {
        let chunker = SentenceChunker::new(Arc::new(CharacterTokenizer), 5, 0_usize)
            .unwrap()
            .with_min_characters(0);
        let text = "This sentence is long. Ok.";
        let chunks = chunker.chunk(text).unwrap();
        assert_eq!(chunks[0].text, "This sentence is long. ");
        assert!(chunks[0].token_count > 5);
        assert_eq!(chunks[1].text, "Ok.");
    }

    #[test]
    fn test_min_sentences() {
        let chunker = words(2, 0).with_min_sentences(2).unwrap();
        let chunks = chunker.chunk("Aa bb. Cc dd. Ee ff.").unwrap();
        assert_eq!(chunks[0].text, "Aa bb. Cc dd. ");
        assert!(words(2, 0).with_min_sentences(0).is_err());
    }

    #[test]
    fn test_unicode_splitter() {
        let chunker = words(100, 0).with_splitter(Arc::new(UnicodeSentenceSplitter));
        let chunks = chunker.chunk("One. Two.").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "One. Two.");
    }

    #[test]
    fn test_empty_and_whitespace() {
        assert!(words(10, 0).chunk("").unwrap().is_empty());
        assert!(words(10, 0).chunk("   \n\t  ").unwrap().is_empty());
    }
}
