//! Recursive splitting rules.
//!
//! A [`RecursiveRules`] value is an ordered list of [`RecursiveLevel`]s,
//! coarsest first. The recursive chunker walks it top-down, dropping a level
//! only for the pieces that are still too large.
//!
//! ```text
//! level 0  "\n\n"            paragraphs
//! level 1  "\n"              lines
//! level 2  ". " "! " "? "    sentences
//! level 3  whitespace        words
//! level 4  graphemes         characters (always last)
//! ```
//!
//! ## Delimiter Attachment
//!
//! A delimiter is never dropped. [`Attach`] decides which side keeps it:
//!
//! ```text
//! "One. Two."   split on ". "
//!
//! Attach::Previous -> ["One. ", "Two."]
//! Attach::Next     -> ["One", ". Two."]
//! ```
//!
//! Either way the pieces concatenate back to the input.
//!
//! ## Adjacent Matches
//!
//! Back-to-back matches collapse into one run, so `"a\n\n\n\nb"` split on
//! `"\n\n"` yields `["a\n\n\n\n", "b"]`, never an empty piece in between.

use std::ops::Range;

use unicode_segmentation::UnicodeSegmentation;

use crate::{Error, Result};

/// What a level splits on.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Split {
    /// Any of these literal strings; the longest match wins at a position.
    Delimiters(Vec<String>),
    /// Runs of Unicode whitespace.
    Whitespace,
    /// Extended grapheme clusters. The atomic fallback.
    Characters,
}

/// Which neighbour keeps a matched delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Attach {
    /// The delimiter ends the preceding piece.
    #[default]
    Previous,
    /// The delimiter starts the following piece.
    Next,
}

/// One splitting granularity.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecursiveLevel {
    /// The split strategy.
    pub split: Split,
    /// Delimiter attachment.
    #[cfg_attr(feature = "serde", serde(default))]
    pub attach: Attach,
}

impl RecursiveLevel {
    /// Split on literal delimiters, delimiters kept with the preceding piece.
    pub fn delimiters<S: AsRef<str>>(delimiters: &[S]) -> Self {
        Self {
            split: Split::Delimiters(delimiters.iter().map(|d| d.as_ref().to_string()).collect()),
            attach: Attach::Previous,
        }
    }

    /// Split on whitespace runs.
    #[must_use]
    pub fn whitespace() -> Self {
        Self {
            split: Split::Whitespace,
            attach: Attach::Previous,
        }
    }

    /// Split into grapheme clusters.
    #[must_use]
    pub fn characters() -> Self {
        Self {
            split: Split::Characters,
            attach: Attach::Previous,
        }
    }

    /// Change delimiter attachment.
    #[must_use]
    pub fn with_attach(mut self, attach: Attach) -> Self {
        self.attach = attach;
        self
    }

    /// Whether this is the atomic character level.
    #[must_use]
    pub fn is_characters(&self) -> bool {
        self.split == Split::Characters
    }

    /// Split `text` into non-empty, contiguous ranges relative to `text`.
    ///
    /// The ranges cover `text` exactly. A text without any match comes back
    /// as a single range.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<Range<usize>> {
        if text.is_empty() {
            return vec![];
        }

        let cuts: Vec<usize> = match &self.split {
            Split::Characters => text
                .grapheme_indices(true)
                .map(|(i, _)| i)
                .filter(|&i| i > 0)
                .collect(),
            Split::Whitespace => self.runs(text, |rest| {
                let len: usize = rest
                    .chars()
                    .take_while(|c| c.is_whitespace())
                    .map(char::len_utf8)
                    .sum();
                (len > 0).then_some(len)
            }),
            Split::Delimiters(delims) => self.runs(text, |rest| {
                delims
                    .iter()
                    .filter(|d| !d.is_empty() && rest.starts_with(d.as_str()))
                    .map(String::len)
                    .max()
            }),
        };

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

    /// Find collapsed delimiter runs and turn them into cut positions.
    fn runs(&self, text: &str, matcher: impl Fn(&str) -> Option<usize>) -> Vec<usize> {
        let mut cuts = Vec::new();
        let mut pos = 0;

        while pos < text.len() {
            let Some(len) = matcher(&text[pos..]) else {
                pos += text[pos..].chars().next().map_or(1, char::len_utf8);
                continue;
            };

            let run_start = pos;
            let mut run_end = pos + len;
            while run_end < text.len() {
                match matcher(&text[run_end..]) {
                    Some(more) => run_end += more,
                    None => break,
                }
            }

            cuts.push(match self.attach {
                Attach::Previous => run_end,
                Attach::Next => run_start,
            });
            pos = run_end;
        }
        cuts
    }
}

/// An ordered hierarchy of split levels, coarsest first.
///
/// Immutable once built and cheap to share between chunkers. The final level is
/// always [`Split::Characters`]; [`RecursiveRules::new`] appends it if missing.
///
/// ```rust
/// use tokenslabs::{RecursiveLevel, RecursiveRules};
///
/// let rules = RecursiveRules::new(vec![
///     RecursiveLevel::delimiters(&["\n\n"]),
///     RecursiveLevel::whitespace(),
/// ]).unwrap();
///
/// assert_eq!(rules.len(), 3);
/// assert!(rules.levels().last().unwrap().is_characters());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(try_from = "Vec<RecursiveLevel>", into = "Vec<RecursiveLevel>")
)]
pub struct RecursiveRules {
    levels: Vec<RecursiveLevel>,
}

impl RecursiveRules {
    /// Build rules from levels.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if `levels` is empty, a delimiter level
    /// has no delimiters, or a delimiter is the empty string.
    pub fn new(mut levels: Vec<RecursiveLevel>) -> Result<Self> {
        if levels.is_empty() {
            return Err(Error::config("recursive rules must have at least one level"));
        }
        for (i, level) in levels.iter().enumerate() {
            if let Split::Delimiters(delims) = &level.split {
                if delims.is_empty() {
                    return Err(Error::config(format!("level {i} has no delimiters")));
                }
                if delims.iter().any(String::is_empty) {
                    return Err(Error::config(format!("level {i} has an empty delimiter")));
                }
            }
        }
        if !levels.last().is_some_and(RecursiveLevel::is_characters) {
            levels.push(RecursiveLevel::characters());
        }
        Ok(Self { levels })
    }

    /// Rules for Markdown: headings, then the prose hierarchy.
    #[must_use]
    pub fn markdown() -> Self {
        Self {
            levels: vec![
                RecursiveLevel::delimiters(&["\n# ", "\n## ", "\n### "]).with_attach(Attach::Next),
                RecursiveLevel::delimiters(&["\n\n"]),
                RecursiveLevel::delimiters(&["\n"]),
                RecursiveLevel::delimiters(&[". ", "! ", "? "]),
                RecursiveLevel::whitespace(),
                RecursiveLevel::characters(),
            ],
        }
    }

    /// The levels, coarsest first.
    #[must_use]
    pub fn levels(&self) -> &[RecursiveLevel] {
        &self.levels
    }

    /// Number of levels, including the character level.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Always false; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Level at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&RecursiveLevel> {
        self.levels.get(index)
    }
}

impl Default for RecursiveRules {
    /// Paragraphs, lines, sentences, words, characters.
    fn default() -> Self {
        Self {
            levels: vec![
                RecursiveLevel::delimiters(&["\n\n"]),
                RecursiveLevel::delimiters(&["\n"]),
                RecursiveLevel::delimiters(&[". ", "! ", "? "]),
                RecursiveLevel::whitespace(),
                RecursiveLevel::characters(),
            ],
        }
    }
}

impl TryFrom<Vec<RecursiveLevel>> for RecursiveRules {
    type Error = Error;

    fn try_from(levels: Vec<RecursiveLevel>) -> Result<Self> {
        Self::new(levels)
    }
}

impl From<RecursiveRules> for Vec<RecursiveLevel> {
    fn from(rules: RecursiveRules) -> Self {
        rules.levels
    }
}
