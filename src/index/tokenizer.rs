//! Chinese-aware tokenization (§4.3, §9 "Chinese tokenization" design note).
//!
//! The business-facing [`Tokenizer`] trait is intentionally independent of tantivy's own
//! `tantivy::tokenizer::Tokenizer` trait: [`IndexDocument`](super::document::IndexDocument)
//! fields store pre-segmented, space-joined token text, so tantivy's own default analyzer is
//! sufficient at query time (see `document.rs`). This trait is the seam the original's
//! `jieba_tokenizer` (a `lucene++::Tokenizer` subclass) occupied, generalized to a crate a plain
//! Lucene-alike library can plug into.

use std::sync::OnceLock;

use jieba_rs::Jieba;

/// Splits a path fragment into lowercased index terms.
///
/// Implementations decide delimiter handling and any language-specific segmentation; the only
/// contract is that the returned tokens are what gets indexed and what query terms are matched
/// against.
pub trait Tokenizer: Send + Sync {
    fn tokens(&self, text: &str) -> Vec<String>;
}

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

/// Dictionary-driven Chinese/ASCII tokenizer (§4.3): delimiter splitting for ASCII runs, jieba's
/// HMM-backed segmentation for Han runs. Tokens are lowercased per §4.3.
pub struct ChineseTokenizer;

impl ChineseTokenizer {
    pub fn new() -> Self {
        // Force dictionary load eagerly rather than on first query.
        jieba();
        Self
    }
}

impl Default for ChineseTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer for ChineseTokenizer {
    fn tokens(&self, text: &str) -> Vec<String> {
        jieba()
            .cut_for_search(text, true)
            .into_iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty() && !is_pure_punctuation(s))
            .map(|s| s.to_lowercase())
            .collect()
    }
}

fn is_pure_punctuation(s: &str) -> bool {
    s.chars().all(|c| !c.is_alphanumeric())
}

/// Romanizes the Han characters in `text` into a single space-joined pinyin term list, so that a
/// query like `beijing` hits a document named `北京.txt` (§3 `IndexDocument.pinyin`, §4.3).
/// Non-Han characters pass through unchanged (lowercased).
pub fn pinyin_terms(text: &str) -> Vec<String> {
    use pinyin::ToPinyin;

    let mut terms = Vec::new();
    let mut ascii_run = String::new();

    for ch in text.chars() {
        match ch.to_pinyin() {
            Some(p) => {
                if !ascii_run.is_empty() {
                    terms.push(std::mem::take(&mut ascii_run).to_lowercase());
                }
                terms.push(p.plain().to_string());
            }
            None => {
                if ch.is_whitespace() || !ch.is_alphanumeric() {
                    if !ascii_run.is_empty() {
                        terms.push(std::mem::take(&mut ascii_run).to_lowercase());
                    }
                } else {
                    ascii_run.push(ch);
                }
            }
        }
    }
    if !ascii_run.is_empty() {
        terms.push(ascii_run.to_lowercase());
    }

    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_tokens_are_lowercased() {
        let tokenizer = ChineseTokenizer::new();
        let tokens = tokenizer.tokens("Notes-Final.TXT");
        assert!(tokens.iter().any(|t| t == "notes"));
        assert!(tokens.iter().all(|t| t.chars().all(|c| !c.is_uppercase())));
    }

    #[test]
    fn han_run_is_segmented() {
        let tokenizer = ChineseTokenizer::new();
        let tokens = tokenizer.tokens("北京旅游攻略.docx");
        assert!(!tokens.is_empty());
    }

    #[test]
    fn pinyin_romanizes_han_characters() {
        let terms = pinyin_terms("北京.txt");
        assert!(terms.iter().any(|t| t == "bei"));
        assert!(terms.iter().any(|t| t == "jing"));
    }

    #[test]
    fn pinyin_passes_ascii_through() {
        let terms = pinyin_terms("notes.txt");
        assert!(terms.iter().any(|t| t == "notes"));
    }
}
