//! Parsing of `token/POS/NER` tagged-token strings for batch ingestion.

use serde::{Deserialize, Serialize};

use crate::error::{DepgraphError, Result};

/// Token with its tags, as produced by the upstream tagger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedToken {
    pub token: String,
    pub pos: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl TaggedToken {
    pub fn new(token: &str, pos: &str, entity_type: &str) -> Self {
        Self {
            token: token.to_string(),
            pos: pos.to_string(),
            entity_type: Some(entity_type.to_string()),
        }
    }

    pub fn untyped(token: &str, pos: &str) -> Self {
        Self {
            token: token.to_string(),
            pos: pos.to_string(),
            entity_type: None,
        }
    }

    pub fn has_token(&self) -> bool {
        !self.token.trim().is_empty()
    }
}

/// Parse one `token/POS[/NER]` item. `index` is reported in `MalformedInput`.
///
/// Fields are split from the right, so with all three fields present the token
/// may itself contain `/` (`1/2/CD/O` is token `1/2`).
pub fn parse_tagged(index: usize, item: &str) -> Result<TaggedToken> {
    let malformed = |reason: &str| DepgraphError::MalformedInput {
        index,
        item: item.to_string(),
        reason: reason.to_string(),
    };

    let mut parts: Vec<&str> = item.rsplitn(3, '/').map(str::trim).collect();
    parts.reverse();

    let (token, pos, entity_type) = match parts.as_slice() {
        [token, pos, ner] => (*token, *pos, Some(*ner)),
        [token, pos] => (*token, *pos, None),
        _ => return Err(malformed("expected token/POS or token/POS/NER")),
    };

    if token.is_empty() {
        return Err(malformed("missing token"));
    }
    if pos.is_empty() {
        return Err(malformed("missing POS tag"));
    }
    if entity_type.is_some_and(str::is_empty) {
        return Err(malformed("empty NER tag"));
    }

    Ok(TaggedToken {
        token: token.to_string(),
        pos: pos.to_string(),
        entity_type: entity_type.map(str::to_string),
    })
}

/// Parse a whole batch, stopping at the first malformed item.
pub fn parse_batch<S: AsRef<str>>(items: &[S]) -> Result<Vec<TaggedToken>> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_tagged(index, item.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_triple() {
        let parsed = parse_tagged(0, "Obama/NNP/PERSON").unwrap();
        assert_eq!(parsed, TaggedToken::new("Obama", "NNP", "PERSON"));
    }

    #[test]
    fn test_parse_without_ner() {
        let parsed = parse_tagged(0, "dog/NN").unwrap();
        assert_eq!(parsed, TaggedToken::untyped("dog", "NN"));
    }

    #[test]
    fn test_parse_token_containing_slash() {
        let parsed = parse_tagged(0, "1/2/CD/O").unwrap();
        assert_eq!(parsed.token, "1/2");
        assert_eq!(parsed.pos, "CD");
        assert_eq!(parsed.entity_type.as_deref(), Some("O"));
    }

    #[test]
    fn test_parse_trims_fields() {
        let parsed = parse_tagged(0, " dog / NN / O ").unwrap();
        assert_eq!(parsed, TaggedToken::new("dog", "NN", "O"));
    }

    #[test]
    fn test_parse_rejects_malformed_items() {
        for item in ["dog", "", "/NN/O", "dog//O", "dog/NN/", "/"] {
            let err = parse_tagged(4, item).unwrap_err();
            match err {
                DepgraphError::MalformedInput { index, item: bad, .. } => {
                    assert_eq!(index, 4);
                    assert_eq!(bad, item);
                }
                other => panic!("unexpected error for {:?}: {}", item, other),
            }
        }
    }

    #[test]
    fn test_parse_batch_reports_first_bad_index() {
        let items = ["the/DT/O", "dog/NN/O", "barks", "loudly/RB/O"];
        let err = parse_batch(&items).unwrap_err();
        assert!(matches!(err, DepgraphError::MalformedInput { index: 2, .. }));
    }

    #[test]
    fn test_tagged_token_json_uses_type_field() {
        let parsed: TaggedToken =
            serde_json::from_str(r#"{"token":"dog","pos":"NN","type":"ANIMAL"}"#).unwrap();
        assert_eq!(parsed.entity_type.as_deref(), Some("ANIMAL"));
    }
}
