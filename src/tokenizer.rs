//! The tokenizer contract every token budget is measured through.
//!
//! ## Why Not Count Characters?
//!
//! Embedding models have token limits, not character limits. A 512-token
//! model can take anywhere from ~300 to ~3000 characters depending on the
//! script and vocabulary. Chunking by characters either wastes capacity or
//! silently truncates.
//!
//! ## Counting Is Not Additive
//!
//! Tokenizers are context-sensitive. BPE merges across what were separate
//! pieces, so in general:
//!
//! ```text
//! count("New") + count(" York") != count("New York")
//! ```
//!
//! Chunkers in this crate therefore recount every composite piece as a whole
//! string before accepting it.
//!
//! ## Implementations
//!
//! | Tokenizer | Token | Lossless |
//! |-----------|-------|----------|
//! | [`CharacterTokenizer`] | one Unicode scalar | yes |
//! | [`WordTokenizer`] | leading whitespace + word | yes |
//! | `tokenizers::Tokenizer` (feature `tokenizers`) | model vocabulary | model-dependent |

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{Error, Result};

/// Encode, decode, and count tokens.
///
/// Implementations must be deterministic: the same text always produces the
/// same ids. Errors are surfaced as [`Error::Tokenization`] and are never
/// retried by the chunkers.
pub trait Tokenizer: Send + Sync {
    /// Encode text into token ids.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token ids back into text.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Count the tokens in `text`.
    fn count_tokens(&self, text: &str) -> Result<usize> {
        self.encode(text).map(|ids| ids.len())
    }

    /// Encode several texts.
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<u32>>> {
        texts.iter().map(|t| self.encode(t)).collect()
    }

    /// Decode several id sequences.
    fn decode_batch(&self, batch: &[Vec<u32>]) -> Result<Vec<String>> {
        batch.iter().map(|ids| self.decode(ids)).collect()
    }

    /// Count tokens for several texts.
    fn count_tokens_batch(&self, texts: &[&str]) -> Result<Vec<usize>> {
        texts.iter().map(|t| self.count_tokens(t)).collect()
    }
}

impl<T: Tokenizer + ?Sized> Tokenizer for Arc<T> {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        (**self).encode(text)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        (**self).decode(ids)
    }

    fn count_tokens(&self, text: &str) -> Result<usize> {
        (**self).count_tokens(text)
    }

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<u32>>> {
        (**self).encode_batch(texts)
    }

    fn decode_batch(&self, batch: &[Vec<u32>]) -> Result<Vec<String>> {
        (**self).decode_batch(batch)
    }

    fn count_tokens_batch(&self, texts: &[&str]) -> Result<Vec<usize>> {
        (**self).count_tokens_batch(texts)
    }
}

/// One token per Unicode scalar value; the id is the scalar itself.
///
/// ```rust
/// use tokenslabs::{CharacterTokenizer, Tokenizer};
///
/// let tok = CharacterTokenizer;
/// assert_eq!(tok.count_tokens("héllo").unwrap(), 5);
/// let ids = tok.encode("hi").unwrap();
/// assert_eq!(tok.decode(&ids).unwrap(), "hi");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CharacterTokenizer;

impl Tokenizer for CharacterTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.chars().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        ids.iter()
            .map(|&id| {
                char::from_u32(id)
                    .ok_or_else(|| Error::tokenization(format!("invalid scalar id {id}")))
            })
            .collect()
    }

    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(text.chars().count())
    }
}

/// One token per word, each carrying its leading whitespace.
///
/// `"the quick  fox"` tokenizes as `["the", " quick", "  fox"]`; trailing
/// whitespace becomes a token of its own. Decoding concatenates, so the
/// round trip is exact.
///
/// Ids are assigned on first sight. The vocabulary lives behind a lock and
/// only `encode` grows it; `count_tokens` never touches it.
#[derive(Debug, Default)]
pub struct WordTokenizer {
    vocab: RwLock<Vocab>,
}

#[derive(Debug, Default)]
struct Vocab {
    ids: HashMap<String, u32>,
    words: Vec<String>,
}

impl WordTokenizer {
    /// Create a tokenizer with an empty vocabulary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct tokens seen so far.
    pub fn vocab_size(&self) -> usize {
        self.vocab.read().map(|v| v.words.len()).unwrap_or(0)
    }
}

/// Split `text` into word tokens with their leading whitespace.
fn word_pieces(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut seen_word = false;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if seen_word {
                pieces.push(&text[start..i]);
                start = i;
                seen_word = false;
            }
        } else {
            seen_word = true;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let pieces = word_pieces(text);
        let mut ids = Vec::with_capacity(pieces.len());
        let mut vocab = self
            .vocab
            .write()
            .map_err(|_| Error::tokenization("word vocabulary lock poisoned"))?;

        for piece in pieces {
            let id = match vocab.ids.get(piece) {
                Some(&id) => id,
                None => {
                    let id = vocab.words.len() as u32;
                    vocab.words.push(piece.to_string());
                    vocab.ids.insert(piece.to_string(), id);
                    id
                }
            };
            ids.push(id);
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let vocab = self
            .vocab
            .read()
            .map_err(|_| Error::tokenization("word vocabulary lock poisoned"))?;

        let mut out = String::new();
        for &id in ids {
            let word = vocab
                .words
                .get(id as usize)
                .ok_or_else(|| Error::tokenization(format!("unknown token id {id}")))?;
            out.push_str(word);
        }
        Ok(out)
    }

    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(word_pieces(text).len())
    }
}

#[cfg(feature = "tokenizers")]
impl Tokenizer for tokenizers::Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        tokenizers::Tokenizer::encode(self, text, false)
            .map(|encoding| encoding.get_ids().to_vec())
            .map_err(Error::tokenization)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        tokenizers::Tokenizer::decode(self, ids, true).map_err(Error::tokenization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn character_round_trip() {
        let tok = CharacterTokenizer;
        let text = "a日本b";
        let ids = tok.encode(text).unwrap();
        assert_eq!(ids.len(), 4);
        assert_eq!(tok.decode(&ids).unwrap(), text);
    }

    #[test]
    fn character_rejects_surrogate_ids() {
        let err = CharacterTokenizer.decode(&[0xD800]).unwrap_err();
        assert!(matches!(err, Error::Tokenization(_)));
    }

    #[test]
    fn word_pieces_keep_leading_whitespace() {
        assert_eq!(word_pieces("the quick  fox"), vec!["the", " quick", "  fox"]);
        assert_eq!(word_pieces("  lead"), vec!["  lead"]);
        assert_eq!(word_pieces("tail "), vec!["tail", " "]);
        assert!(word_pieces("").is_empty());
    }

    #[test]
    fn word_round_trip_is_exact() {
        let tok = WordTokenizer::new();
        let text = "Para one.\n\nPara two ";
        let ids = tok.encode(text).unwrap();
        assert_eq!(ids.len(), tok.count_tokens(text).unwrap());
        assert_eq!(tok.decode(&ids).unwrap(), text);
    }

    #[test]
    fn word_ids_are_stable() {
        let tok = WordTokenizer::new();
        let a = tok.encode("to be or not to be").unwrap();
        let b = tok.encode("to be or not to be").unwrap();
        assert_eq!(a, b);
        // "to" and " to" are distinct tokens
        assert_eq!(tok.vocab_size(), 5);
    }

    #[test]
    fn unknown_word_id_fails() {
        let tok = WordTokenizer::new();
        assert!(tok.decode(&[42]).is_err());
    }

    #[test]
    fn batch_defaults_match_singles() {
        let tok = CharacterTokenizer;
        assert_eq!(tok.count_tokens_batch(&["ab", "", "xyz"]).unwrap(), vec![2, 0, 3]);
    }
}
