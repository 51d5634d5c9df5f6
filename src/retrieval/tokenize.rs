use crate::error::{AppError, Result};
use std::collections::HashSet;
use std::path::Path;
use tokenizers::Tokenizer;
use unicode_segmentation::UnicodeSegmentation;

/// Text -> token sequence. Used for both corpus documents and queries, so an
/// implementation must be deterministic.
pub trait TextTokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Default lexical tokenizer for mixed CJK / latin text.
///
/// Tokenization strategy:
/// 1. Split on Unicode word boundaries (UAX #29)
/// 2. Latin, digit and other non-CJK words are lowercased and kept whole
/// 3. Contiguous CJK runs are segmented by forward maximum matching against
///    the user dictionary; unmatched characters become single-char tokens
/// 4. Punctuation and whitespace are dropped
#[derive(Debug, Clone, Default)]
pub struct LexicalTokenizer {
    dictionary: HashSet<String>,
    /// Longest dictionary entry, in chars
    max_word_chars: usize,
}

impl LexicalTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dictionary<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tokenizer = Self::new();
        tokenizer.add_words(words);
        tokenizer
    }

    /// Register words that must survive segmentation as single tokens.
    ///
    /// Only all-CJK words are kept: latin words are never segmented, so a
    /// dictionary entry for them could never match.
    pub fn add_words<I, S>(&mut self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for word in words {
            let word: String = word.into();
            let word = word.trim().to_lowercase();
            let chars = word.chars().count();
            if chars < 2 || !word.chars().all(is_cjk) {
                continue;
            }
            self.max_word_chars = self.max_word_chars.max(chars);
            self.dictionary.insert(word);
        }
    }

    pub fn dictionary_len(&self) -> usize {
        self.dictionary.len()
    }

    fn segment_cjk(&self, run: &[char], tokens: &mut Vec<String>) {
        let mut start = 0;
        while start < run.len() {
            let longest = self.max_word_chars.min(run.len() - start);
            let matched = (2..=longest).rev().find_map(|len| {
                let candidate: String = run[start..start + len].iter().collect();
                self.dictionary.contains(&candidate).then_some((candidate, len))
            });

            match matched {
                Some((word, len)) => {
                    tokens.push(word);
                    start += len;
                }
                None => {
                    tokens.push(run[start].to_string());
                    start += 1;
                }
            }
        }
    }
}

impl TextTokenizer for LexicalTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut cjk_run: Vec<char> = Vec::new();

        for segment in text.split_word_bounds() {
            if segment.chars().all(is_cjk) {
                cjk_run.extend(segment.chars());
                continue;
            }

            if !cjk_run.is_empty() {
                self.segment_cjk(&cjk_run, &mut tokens);
                cjk_run.clear();
            }

            if segment.chars().any(char::is_alphanumeric) {
                tokens.push(segment.to_lowercase());
            }
        }

        if !cjk_run.is_empty() {
            self.segment_cjk(&cjk_run, &mut tokens);
        }

        tokens
    }
}

/// CJK ideographs and Japanese kana.
fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xF900..=0xFAFF
        | 0x20000..=0x2A6DF)
}

/// Read a newline-delimited word list. Blank lines and `#` comments are skipped.
pub fn load_dictionary(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::ConfigError(format!("failed to read dictionary '{}': {}", path.display(), e))
    })?;

    let words: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect();

    tracing::info!(path = %path.display(), words = words.len(), "User dictionary loaded");
    Ok(words)
}

/// Lexical tokenizer backed by a HuggingFace `tokenizer.json`.
pub struct HfLexicalTokenizer {
    tokenizer: Tokenizer,
}

impl HfLexicalTokenizer {
    pub fn load(tokenizer_path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| AppError::TokenizationError(e.to_string()))?;

        tracing::info!(
            path = %tokenizer_path.display(),
            "Lexical tokenizer loaded"
        );

        Ok(Self { tokenizer })
    }
}

impl TextTokenizer for HfLexicalTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.get_tokens().to_vec(),
            Err(e) => {
                tracing::warn!(error = %e, "Tokenization failed, treating text as empty");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cjk_without_dictionary_splits_chars() {
        let tokenizer = LexicalTokenizer::new();
        assert_eq!(tokenizer.tokenize("查看购物车"), vec!["查", "看", "购", "物", "车"]);
    }

    #[test]
    fn test_dictionary_words_kept_whole() {
        let tokenizer = LexicalTokenizer::with_dictionary(["购物车", "查看"]);
        assert_eq!(tokenizer.tokenize("查看购物车"), vec!["查看", "购物车"]);
    }

    #[test]
    fn test_latin_dictionary_words_are_ignored() {
        let plain = LexicalTokenizer::new();
        let tokenizer =
            LexicalTokenizer::with_dictionary(["open_cart", "sign_in", "京东app", "签到"]);

        assert_eq!(tokenizer.dictionary_len(), 1);
        let text = "open_cart 京东签到 sign in";
        assert_eq!(
            tokenizer.tokenize(text),
            vec!["open_cart", "京", "东", "签到", "sign", "in"]
        );
        assert_eq!(plain.tokenize("open_cart sign_in"), tokenizer.tokenize("open_cart sign_in"));
    }

    #[test]
    fn test_longest_match_wins() {
        let tokenizer = LexicalTokenizer::with_dictionary(["购物", "购物车"]);
        assert_eq!(tokenizer.tokenize("购物车里"), vec!["购物车", "里"]);
    }

    #[test]
    fn test_mixed_script_and_punctuation() {
        let tokenizer = LexicalTokenizer::with_dictionary(["淘宝"]);
        let tokens = tokenizer.tokenize("打开淘宝App，查看 Order_Status!");
        assert_eq!(tokens, vec!["打", "开", "淘宝", "app", "查", "看", "order_status"]);
    }

    #[test]
    fn test_single_char_words_ignored_in_dictionary() {
        let tokenizer = LexicalTokenizer::with_dictionary(["车", "  ", "发票"]);
        assert_eq!(tokenizer.dictionary_len(), 1);
    }

    #[test]
    fn test_empty_and_punctuation_only() {
        let tokenizer = LexicalTokenizer::new();
        assert!(tokenizer.tokenize("").is_empty());
        assert!(tokenizer.tokenize("，。！?  ").is_empty());
    }

    #[test]
    fn test_load_dictionary_skips_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, "# core words\n购物车\n\n 待收货 \n".as_bytes()).unwrap();

        let words = load_dictionary(file.path()).unwrap();
        assert_eq!(words, vec!["购物车", "待收货"]);
    }
}
