// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the encoder's vocabulary from the encoder directory:
//
//   <bert_dir>/tokenizer.json  → loaded as-is
//   <bert_dir>/vocab.txt       → one token per line, id = line
//                                number, wrapped in a WordLevel
//                                tokenizer built from JSON
//
// Text is tokenised per character so that token i+1 always
// lines up with char i (token 0 is [CLS]). Offsets in the
// annotations therefore map straight onto token positions.
//
// Reference: HuggingFace tokenizers JSON format

use anyhow::{anyhow, Context, Result};
use std::{fs, path::PathBuf, str::FromStr};
use tokenizers::Tokenizer;

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    /// Create a store reading from the encoder directory `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load tokenizer.json if present, otherwise build one from vocab.txt
    pub fn load(&self) -> Result<Tokenizer> {
        let tok_path = self.dir.join("tokenizer.json");
        if tok_path.exists() {
            tracing::info!("Loading tokenizer from '{}'", tok_path.display());
            return Tokenizer::from_file(&tok_path).map_err(|e| {
                anyhow!("Cannot load tokenizer from '{}': {}", tok_path.display(), e)
            });
        }

        let vocab_path = self.dir.join("vocab.txt");
        let vocab = fs::read_to_string(&vocab_path).with_context(|| {
            format!(
                "Neither tokenizer.json nor vocab.txt found in '{}'",
                self.dir.display()
            )
        })?;

        let tokens: Vec<&str> = vocab.lines().map(|l| l.trim_end_matches('\r')).collect();
        tracing::info!(
            "Building tokenizer from '{}' ({} tokens)",
            vocab_path.display(),
            tokens.len()
        );
        build_word_level(&tokens)
    }

    /// Load the vocabulary and check it carries the BERT special tokens.
    pub fn load_vocab(&self) -> Result<CharVocab> {
        CharVocab::new(self.load()?)
            .with_context(|| format!("Invalid vocabulary in '{}'", self.dir.display()))
    }
}

/// Build an in-memory WordLevel tokenizer whose ids are the
/// positions of `tokens`.
pub fn build_word_level(tokens: &[&str]) -> Result<Tokenizer> {
    let mut vocab = serde_json::Map::new();
    for (id, tok) in tokens.iter().enumerate() {
        // first occurrence wins, matching BERT vocab loading
        vocab
            .entry(tok.to_string())
            .or_insert_with(|| serde_json::json!(id));
    }

    let tokenizer_json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "[UNK]"
        }
    });

    Tokenizer::from_str(&tokenizer_json.to_string())
        .map_err(|e| anyhow!("Cannot build tokenizer: {e}"))
}

// ─── CharVocab ────────────────────────────────────────────────────────────────
/// Per-character view over a tokenizer's vocabulary.
pub struct CharVocab {
    tokenizer:   Tokenizer,
    pub cls_id:  u32,
    pub sep_id:  u32,
    pub pad_id:  u32,
    pub unk_id:  u32,
    blank_id:    Option<u32>,
}

impl CharVocab {
    /// Wrap `tokenizer`, failing when [CLS], [SEP], [PAD] or [UNK]
    /// is missing. [BLANK] is optional.
    pub fn new(tokenizer: Tokenizer) -> Result<Self> {
        let id = |tok: &str| {
            tokenizer
                .token_to_id(tok)
                .ok_or_else(|| anyhow!("special token {tok} is missing from the vocabulary"))
        };
        let cls_id   = id("[CLS]")?;
        let sep_id   = id("[SEP]")?;
        let pad_id   = id("[PAD]")?;
        let unk_id   = id("[UNK]")?;
        let blank_id = tokenizer.token_to_id("[BLANK]");

        Ok(Self { tokenizer, cls_id, sep_id, pad_id, unk_id, blank_id })
    }

    /// Largest id any token maps to. vocab.txt ids are line numbers,
    /// so a repeated line leaves a gap below this.
    pub fn max_id(&self) -> u32 {
        self.tokenizer.get_vocab(true).into_values().max().unwrap_or(0)
    }

    /// Vocabulary id of a single char. ASCII letters are
    /// lower-cased, whitespace maps to [BLANK] when the vocab has it.
    pub fn char_id(&self, c: char) -> u32 {
        if c.is_whitespace() {
            return self.blank_id.unwrap_or(self.unk_id);
        }
        let mut buf = [0u8; 4];
        let s = c.to_ascii_lowercase();
        self.tokenizer
            .token_to_id(s.encode_utf8(&mut buf))
            .unwrap_or(self.unk_id)
    }

    /// One id per char of `text`
    pub fn encode_chars(&self, text: &str) -> Vec<u32> {
        text.chars().map(|c| self.char_id(c)).collect()
    }
}

/// Vocabulary of specials plus the given chars, for tests
#[cfg(test)]
pub fn test_vocab(chars: &str) -> CharVocab {
    let mut tokens: Vec<String> = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[BLANK]"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    tokens.extend(chars.chars().map(|c| c.to_string()));
    let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
    CharVocab::new(build_word_level(&refs).unwrap()).unwrap()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_vocab_txt_ids_are_line_numbers() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("vocab.txt"), "[PAD]\n[UNK]\n[CLS]\n[SEP]\n公\n司\na\n").unwrap();

        let vocab = TokenizerStore::new(dir.path()).load_vocab().unwrap();
        assert_eq!(vocab.cls_id, 2);
        assert_eq!(vocab.sep_id, 3);
        assert_eq!(vocab.encode_chars("公司"), vec![4, 5]);
        assert_eq!(vocab.char_id('A'), 6);
        assert_eq!(vocab.char_id('厂'), vocab.unk_id);
    }

    #[test]
    fn test_max_id_follows_line_numbers() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("vocab.txt"), "[PAD]\n[UNK]\n[CLS]\n[SEP]\n公\n公\n司\n").unwrap();

        let vocab = TokenizerStore::new(dir.path()).load_vocab().unwrap();
        assert_eq!(vocab.char_id('公'), 4);
        assert_eq!(vocab.max_id(), 6);
    }

    #[test]
    fn test_whitespace_maps_to_blank() {
        let vocab = test_vocab("ab");
        assert_eq!(vocab.char_id(' '), 4);
    }

    #[test]
    fn test_missing_special_token_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("vocab.txt"), "[PAD]\n[UNK]\n[SEP]\n公\n司\n").unwrap();

        let err = TokenizerStore::new(dir.path()).load_vocab().err().unwrap();
        assert!(format!("{err:#}").contains("[CLS]"));
    }

    #[test]
    fn test_missing_vocab_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(TokenizerStore::new(dir.path()).load().is_err());
    }
}
