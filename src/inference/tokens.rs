//! Special command token ids.

use serde::{Deserialize, Serialize};

use crate::GlmError;

/// Marker spelling of the short-span blank
pub const MASK_MARKER: &str = "[MASK]";
/// Marker spelling of the long-generation blank
pub const GMASK_MARKER: &str = "[gMASK]";

/// Ids of the tokenizer's command tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTokens {
    /// `[MASK]`
    pub mask: u32,
    /// `[gMASK]`
    pub gmask: u32,
    /// `[sMASK]`
    pub smask: u32,
    /// Start of a generated piece
    pub sop: u32,
    /// End of a generated piece
    pub eop: u32,
    /// End of text
    pub eos: u32,
}

impl Default for CommandTokens {
    /// Ids of the icetk GLM-130B tokenizer
    fn default() -> Self {
        Self {
            mask: 150000,
            gmask: 150001,
            smask: 150002,
            sop: 150004,
            eop: 150005,
            eos: 150005,
        }
    }
}

impl CommandTokens {
    /// Token id for a marker spelled in query text
    pub fn for_marker(&self, marker: &str) -> Option<u32> {
        match marker {
            MASK_MARKER => Some(self.mask),
            GMASK_MARKER => Some(self.gmask),
            _ => None,
        }
    }

    /// Mask token the blank filler generates for
    pub fn generation_mask(&self, task_mask: bool) -> u32 {
        if task_mask {
            self.gmask
        } else {
            self.mask
        }
    }

    /// Tokens that terminate a generated piece, deduplicated
    pub fn end_tokens(&self) -> Vec<u32> {
        let mut tokens = vec![self.eop, self.eos];
        tokens.dedup();
        tokens
    }

    pub fn validate(&self, vocab_size: usize) -> crate::Result<()> {
        let ids = [
            ("mask", self.mask),
            ("gmask", self.gmask),
            ("smask", self.smask),
            ("sop", self.sop),
            ("eop", self.eop),
            ("eos", self.eos),
        ];
        for (name, id) in ids {
            if id as usize >= vocab_size {
                return Err(GlmError::ConfigError(format!(
                    "command token {name} = {id} is outside the vocabulary of {vocab_size}"
                )));
            }
        }
        if self.mask == self.gmask || self.sop == self.eop {
            return Err(GlmError::ConfigError(
                "mask/gmask and sop/eop must be distinct tokens".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fit_glm_vocab() {
        let tokens = CommandTokens::default();
        assert!(tokens.validate(150528).is_ok());
        assert!(tokens.validate(150000).is_err());
        assert_eq!(tokens.end_tokens(), vec![150005]);
    }

    #[test]
    fn test_markers() {
        let tokens = CommandTokens::default();
        assert_eq!(tokens.for_marker("[MASK]"), Some(150000));
        assert_eq!(tokens.for_marker("[gMASK]"), Some(150001));
        assert_eq!(tokens.for_marker("[sMASK]"), None);
        assert_eq!(tokens.generation_mask(true), 150001);
        assert_eq!(tokens.generation_mask(false), 150000);
    }
}
