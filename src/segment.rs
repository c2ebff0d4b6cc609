//! Rule-based sentence segmentation for biomedical prose.
//!
//! A boundary candidate is a whitespace run that directly follows `.`, `!`
//! or `?` (optionally with one closing quote in between). The candidate is
//! dropped when the text right before the whitespace ends in a known
//! abbreviation. The abbreviation grammar is data ([`AbbreviationSet`]) so
//! it can be extended from config without touching the splitter.
//!
//! The whitespace run stays attached to the sentence before it, so
//! concatenating the sentences of a text gives back the text exactly.
//!
//! # Exception kinds
//!
//! | Kind | Matches when | Examples |
//! |------|--------------|----------|
//! | suffix | the text ends with it (case-insensitive) | `Dr.`, `Fig.`, `e.g.`, `i.v.` |
//! | token | it ends the text and is preceded by whitespace | `al.`, `cf.`, `sp.`, `no.` |
//! | initial | one word character plus `.` at the start or after whitespace | `E. coli`, `J. Smith` |

use crate::config::SegmenterConfig;

const SENTENCE_END: [char; 3] = ['.', '!', '?'];
const CLOSING_QUOTES: [char; 2] = ['"', '\''];

/// Case-insensitive suffix exceptions.
pub const DEFAULT_SUFFIX_EXCEPTIONS: &[&str] = &[
    "Dr.", "Fig.", "Jr.", "Mr.", "Mrs.", "Prof.", "Tab.", "s.p.", "subsp.", "Sr.", "e.g.",
    "i.c.", "i.d.", "i.e.", "i.m.", "i.q.", "i.v.", "m.p.", "o.d.", "o.h.", "o.m.", "o.n.",
    "o.s.", "p.c.", "p.i.", "q.d.", "q.h.", "q.l.", "q.n.", "q.p.", "q.q.h.", "q.s.", "q.v.",
    "II.", "IV.", "XI.", "XV.",
];

/// Short abbreviations that only count when they stand alone as a word.
pub const DEFAULT_TOKEN_EXCEPTIONS: &[&str] = &[
    "ab.", "al.", "ap.", "ag.", "bv.", "ca.", "cf.", "ch.", "cl.", "cu.", "cv.", "dc.", "et.",
    "ex.", "fo.", "ft.", "gr.", "kl.", "mt.", "no.", "nr.", "pp.", "pr.", "ps.", "pv.", "se.",
    "si.", "sm.", "so.", "sp.", "st.", "sv.", "sw.",
];

/// A sentence and its offset in the enclosing text stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub text: String,
    pub offset: usize,
}

/// Abbreviations that suppress a sentence boundary.
#[derive(Debug, Clone)]
pub struct AbbreviationSet {
    suffixes: Vec<Vec<char>>,
    tokens: Vec<Vec<char>>,
    single_letter_initials: bool,
    /// Longest pattern plus one char for the whitespace check.
    window: usize,
}

impl Default for AbbreviationSet {
    fn default() -> Self {
        Self::new(
            DEFAULT_SUFFIX_EXCEPTIONS.iter().copied(),
            DEFAULT_TOKEN_EXCEPTIONS.iter().copied(),
            true,
        )
    }
}

fn lower_chars(s: &str) -> Vec<char> {
    s.chars().flat_map(char::to_lowercase).collect()
}

impl AbbreviationSet {
    pub fn new<'a>(
        suffixes: impl IntoIterator<Item = &'a str>,
        tokens: impl IntoIterator<Item = &'a str>,
        single_letter_initials: bool,
    ) -> Self {
        let suffixes: Vec<Vec<char>> = suffixes
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(lower_chars)
            .collect();
        let tokens: Vec<Vec<char>> = tokens
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(lower_chars)
            .collect();
        let longest = suffixes
            .iter()
            .chain(tokens.iter())
            .map(Vec::len)
            .max()
            .unwrap_or(0);
        Self {
            suffixes,
            tokens,
            single_letter_initials,
            window: longest.max(2) + 1,
        }
    }

    pub fn from_config(cfg: &SegmenterConfig) -> Self {
        let suffixes: Vec<String> = match &cfg.suffix_exceptions {
            Some(list) => list.clone(),
            None => DEFAULT_SUFFIX_EXCEPTIONS.iter().map(|s| s.to_string()).collect(),
        };
        let tokens: Vec<String> = match &cfg.token_exceptions {
            Some(list) => list.clone(),
            None => DEFAULT_TOKEN_EXCEPTIONS.iter().map(|s| s.to_string()).collect(),
        };
        Self::new(
            suffixes
                .iter()
                .chain(cfg.extra_suffix_exceptions.iter())
                .map(String::as_str),
            tokens
                .iter()
                .chain(cfg.extra_token_exceptions.iter())
                .map(String::as_str),
            cfg.single_letter_initials,
        )
    }

    /// Whether a boundary right after `before` is suppressed.
    pub fn suppresses(&self, before: &str) -> bool {
        // tail[0] is the last char of `before`
        let mut tail: Vec<char> = Vec::with_capacity(self.window);
        let mut chars = before.chars().rev();
        for c in chars.by_ref() {
            tail.extend(c.to_lowercase());
            if tail.len() >= self.window {
                break;
            }
        }
        let exhausted = chars.next().is_none();
        tail.reverse();

        if self.suffixes.iter().any(|s| tail.ends_with(s)) {
            return true;
        }
        for token in &self.tokens {
            if tail.ends_with(token) {
                let at = tail.len() - token.len();
                if at > 0 && tail[at - 1].is_whitespace() {
                    return true;
                }
            }
        }
        if self.single_letter_initials && tail.len() >= 2 {
            let n = tail.len();
            let (letter, dot) = (tail[n - 2], tail[n - 1]);
            if dot == '.' && is_word_char(letter) {
                let at_start = n == 2 && exhausted;
                let after_space = n > 2 && tail[n - 3].is_whitespace();
                if at_start || after_space {
                    return true;
                }
            }
        }
        false
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Splits text into sentences using an [`AbbreviationSet`].
#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    exceptions: AbbreviationSet,
}

impl Segmenter {
    pub fn new(exceptions: AbbreviationSet) -> Self {
        Self { exceptions }
    }

    pub fn from_config(cfg: &SegmenterConfig) -> Self {
        Self::new(AbbreviationSet::from_config(cfg))
    }

    pub fn segment(&self, text: &str) -> Vec<Sentence> {
        self.segment_at(text, 0)
    }

    /// Sentences with offsets starting at `base`.
    pub fn segment_at(&self, text: &str, base: usize) -> Vec<Sentence> {
        let mut sentences = Vec::new();
        let mut start = 0usize;
        let mut offset = base;
        for boundary in self.boundaries(text) {
            let piece = &text[start..boundary];
            sentences.push(Sentence {
                text: piece.to_string(),
                offset,
            });
            offset += piece.chars().count();
            start = boundary;
        }
        if start < text.len() {
            sentences.push(Sentence {
                text: text[start..].to_string(),
                offset,
            });
        }
        sentences
    }

    /// Byte indices at which a new sentence starts (never 0 or `text.len()`).
    pub fn boundaries(&self, text: &str) -> Vec<usize> {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let mut out = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            if !chars[i].1.is_whitespace() {
                i += 1;
                continue;
            }
            let run_start = i;
            while i < chars.len() && chars[i].1.is_whitespace() {
                i += 1;
            }
            if i == chars.len() || !ends_sentence(&chars[..run_start]) {
                continue;
            }
            let before = &text[..chars[run_start].0];
            if !self.exceptions.suppresses(before) {
                out.push(chars[i].0);
            }
        }
        out
    }
}

fn ends_sentence(prefix: &[(usize, char)]) -> bool {
    match prefix {
        [.., (_, p)] if SENTENCE_END.contains(p) => true,
        [.., (_, p), (_, q)] if SENTENCE_END.contains(p) && CLOSING_QUOTES.contains(q) => true,
        _ => false,
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Words, abbreviations and terminators glued with assorted whitespace,
    /// so that boundaries and suppressions both occur often.
    fn prose() -> impl Strategy<Value = String> {
        let word = prop::sample::select(vec![
            "Dr.", "E.", "coli", "Fig.", "cf.", "et", "al.", "i.v.", "3.14", "end.", "stop!",
            "why?", "\"quoted.\"", "末尾。", "Ωmega", "a", "Results",
        ]);
        let gap = prop::sample::select(vec![" ", "  ", "\n", "\t", "\n\n", ""]);
        prop::collection::vec((word, gap), 0..40).prop_map(|parts| {
            parts
                .into_iter()
                .flat_map(|(w, g)| [w, g])
                .collect::<String>()
        })
    }

    fn check_offsets(text: &str, base: usize) -> Result<(), TestCaseError> {
        let sentences = Segmenter::default().segment_at(text, base);
        let joined: String = sentences.iter().map(|s| s.text.as_str()).collect();
        prop_assert_eq!(joined.as_str(), text);
        if let Some(first) = sentences.first() {
            prop_assert_eq!(first.offset, base);
        }
        for pair in sentences.windows(2) {
            prop_assert!(!pair[0].text.is_empty());
            prop_assert_eq!(pair[1].offset, pair[0].offset + pair[0].text.chars().count());
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn prose_sentences_cover_input(text in prose(), base in 0usize..10_000) {
            check_offsets(&text, base)?;
        }

        #[test]
        fn arbitrary_text_sentences_cover_input(text in "\\PC{0,200}", base in 0usize..10_000) {
            check_offsets(&text, base)?;
        }

        #[test]
        fn boundaries_are_increasing_char_starts(text in prose()) {
            let cuts = Segmenter::default().boundaries(&text);
            for pair in cuts.windows(2) {
                prop_assert!(pair[0] < pair[1]);
            }
            for cut in cuts {
                prop_assert!(cut > 0 && cut < text.len());
                prop_assert!(text.is_char_boundary(cut));
            }
        }
    }
}
