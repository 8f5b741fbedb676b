//! Query parsing and encoding with blank markers.

use super::tokens::{CommandTokens, GMASK_MARKER, MASK_MARKER};
use super::TextTokenizer;
use crate::GlmError;

/// One input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub id: Option<String>,
    pub text: String,
}

impl Query {
    /// Parse an input line; with ids the line is `id<TAB>text`
    pub fn parse(line: &str, with_id: bool) -> crate::Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if with_id {
            let (id, text) = line
                .split_once('\t')
                .ok_or_else(|| GlmError::QueryError(format!("expected id<TAB>text, got {line:?}")))?;
            if id.is_empty() {
                return Err(GlmError::QueryError("empty query id".to_string()));
            }
            Ok(Self {
                id: Some(id.to_string()),
                text: text.to_string(),
            })
        } else {
            Ok(Self {
                id: None,
                text: line.to_string(),
            })
        }
    }
}

/// A query ready for blank filling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedQuery {
    /// Query text as extended during encoding
    pub text: String,
    /// Token ids, markers replaced by command tokens
    pub tokens: Vec<u32>,
    /// Mask token the filler generates for
    pub generation_mask: u32,
}

/// Encode a query, inserting command tokens for `[MASK]` / `[gMASK]` markers.
///
/// Without any marker the generation mask is appended; unless the text then
/// ends in a marker, `eos` closes the sequence.
pub fn encode_query<T>(
    query: &Query,
    tokenizer: &T,
    commands: &CommandTokens,
    task_mask: bool,
    max_sequence_length: usize,
) -> crate::Result<EncodedQuery>
where
    T: TextTokenizer + ?Sized,
{
    let raw = query.text.as_str();
    if (task_mask && raw.contains(MASK_MARKER)) || (!task_mask && raw.contains(GMASK_MARKER)) {
        return Err(GlmError::QueryError("should not mix [MASK] and [gMASK]".to_string()));
    }

    let mut tokens = Vec::new();
    let mut rest = raw;
    while let Some((at, marker)) = next_marker(rest) {
        if at > 0 {
            tokens.extend(tokenizer.tokenize(&rest[..at])?);
        }
        // Markers come from next_marker, so the lookup cannot miss
        if let Some(id) = commands.for_marker(marker) {
            tokens.push(id);
        }
        rest = &rest[at + marker.len()..];
    }
    if !rest.is_empty() {
        tokens.extend(tokenizer.tokenize(rest)?);
    }

    let generation_mask = commands.generation_mask(task_mask);
    let mut text = raw.to_string();
    if !raw.contains("MASK]") {
        tokens.push(generation_mask);
        text.push(' ');
        text.push_str(if task_mask { GMASK_MARKER } else { MASK_MARKER });
    }
    if !text.ends_with("MASK]") {
        tokens.push(commands.eos);
    }

    if tokens.len() > max_sequence_length {
        return Err(GlmError::QueryError(format!(
            "text too long: {} tokens, limit {}",
            tokens.len(),
            max_sequence_length
        )));
    }

    Ok(EncodedQuery {
        text,
        tokens,
        generation_mask,
    })
}

/// Earliest blank marker in `text`
fn next_marker(text: &str) -> Option<(usize, &'static str)> {
    [MASK_MARKER, GMASK_MARKER]
        .into_iter()
        .filter_map(|m| text.find(m).map(|at| (at, m)))
        .min_by_key(|(at, _)| *at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::tokenizer::testing::DigitTokenizer;

    fn commands() -> CommandTokens {
        CommandTokens {
            mask: 20,
            gmask: 21,
            smask: 25,
            sop: 22,
            eop: 23,
            eos: 24,
        }
    }

    fn encode(text: &str, task_mask: bool) -> crate::Result<EncodedQuery> {
        let query = Query::parse(text, false).unwrap();
        encode_query(&query, &DigitTokenizer, &commands(), task_mask, 16)
    }

    #[test]
    fn test_parse_with_id() {
        let query = Query::parse("q17\twhat is 1 2\n", true).unwrap();
        assert_eq!(query.id.as_deref(), Some("q17"));
        assert_eq!(query.text, "what is 1 2");

        assert!(Query::parse("no tab here", true).is_err());
        assert_eq!(Query::parse("plain", false).unwrap().id, None);
    }

    #[test]
    fn test_appends_generation_mask() {
        let encoded = encode("1 2 3", true).unwrap();
        assert_eq!(encoded.tokens, vec![1, 2, 3, 21]);
        assert_eq!(encoded.text, "1 2 3 [gMASK]");
        assert_eq!(encoded.generation_mask, 21);

        let encoded = encode("1 2", false).unwrap();
        assert_eq!(encoded.tokens, vec![1, 2, 20]);
        assert_eq!(encoded.text, "1 2 [MASK]");
    }

    #[test]
    fn test_inline_masks_get_eos() {
        let encoded = encode("1 [MASK] 2 [MASK] 3", false).unwrap();
        assert_eq!(encoded.tokens, vec![1, 20, 2, 20, 3, 24]);
        assert_eq!(encoded.text, "1 [MASK] 2 [MASK] 3");
    }

    #[test]
    fn test_trailing_mask_has_no_eos() {
        let encoded = encode("4 5 [gMASK]", true).unwrap();
        assert_eq!(encoded.tokens, vec![4, 5, 21]);
    }

    #[test]
    fn test_mixed_masks_rejected() {
        assert!(matches!(encode("1 [MASK] 2", true), Err(GlmError::QueryError(_))));
        assert!(matches!(encode("1 [gMASK] 2", false), Err(GlmError::QueryError(_))));
    }

    #[test]
    fn test_too_long() {
        let long = "1 ".repeat(20);
        let err = encode(&long, true).unwrap_err();
        assert!(err.to_string().contains("text too long"));
    }
}
