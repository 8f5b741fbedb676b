//! Text tokenizer seam.

use std::path::Path;
use tokenizers::Tokenizer;

use crate::GlmError;

/// Plain-text tokenization without command tokens
pub trait TextTokenizer {
    fn tokenize(&self, text: &str) -> crate::Result<Vec<u32>>;
    fn detokenize(&self, ids: &[u32]) -> crate::Result<String>;
}

/// A `tokenizer.json` tokenizer from the `tokenizers` crate
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let inner = Tokenizer::from_file(path).map_err(|e| {
            GlmError::TokenizerError(format!("failed to load {}: {}", path.display(), e))
        })?;
        Ok(Self { inner })
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl From<Tokenizer> for HfTokenizer {
    fn from(inner: Tokenizer) -> Self {
        Self { inner }
    }
}

impl TextTokenizer for HfTokenizer {
    fn tokenize(&self, text: &str) -> crate::Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| GlmError::TokenizerError(format!("tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn detokenize(&self, ids: &[u32]) -> crate::Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| GlmError::TokenizerError(format!("decoding failed: {}", e)))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::TextTokenizer;

    /// Each digit is its own token; everything else is dropped.
    /// Ids of 10 and above decode as `<id>`.
    pub(crate) struct DigitTokenizer;

    impl TextTokenizer for DigitTokenizer {
        fn tokenize(&self, text: &str) -> crate::Result<Vec<u32>> {
            Ok(text.chars().filter_map(|c| c.to_digit(10)).collect())
        }

        fn detokenize(&self, ids: &[u32]) -> crate::Result<String> {
            Ok(ids
                .iter()
                .map(|&id| if id < 10 { id.to_string() } else { format!("<{id}>") })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::DigitTokenizer;
    use super::*;

    #[test]
    fn test_digit_tokenizer() {
        let tokenizer = DigitTokenizer;
        assert_eq!(tokenizer.tokenize("1 2 3").unwrap(), vec![1, 2, 3]);
        assert_eq!(tokenizer.detokenize(&[4, 5, 22]).unwrap(), "45<22>");
    }

    #[test]
    fn test_missing_tokenizer_file() {
        assert!(matches!(
            HfTokenizer::from_file("/nonexistent/tokenizer.json"),
            Err(GlmError::TokenizerError(_))
        ));
    }
}
