//! Defensive JSON extraction from model output.
//!
//! Model replies may be wrapped in markdown fences or surrounded by prose.
//! The first balanced `{...}` object is located, parsed, then validated
//! against a typed schema before anything downstream sees it.

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum JsonExtractError {
    #[error("no json object found in model output")]
    NoObject,
    #[error("model output does not match schema: {0}")]
    Schema(String),
}

pub fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}

/// Returns the first balanced top-level object, honouring string literals and escapes.
pub fn extract_json_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in input[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&input[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn parse_json_object<T: DeserializeOwned>(raw: &str) -> Result<T, JsonExtractError> {
    let cleaned = strip_markdown_fence(raw);
    let object = extract_json_object(&cleaned).ok_or(JsonExtractError::NoObject)?;
    serde_json::from_str(object).map_err(|err| JsonExtractError::Schema(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pick {
        id: String,
    }

    #[test]
    fn fenced_output() {
        let raw = "```json\n{\"id\": \"123\"}\n```";
        assert_eq!(parse_json_object::<Pick>(raw), Ok(Pick { id: "123".into() }));
    }

    #[test]
    fn prose_around_object() {
        let raw = "Sure! Here you go: {\"id\": \"9\", \"note\": \"has } brace\"} Hope it helps {x}";
        assert_eq!(
            extract_json_object(raw),
            Some("{\"id\": \"9\", \"note\": \"has } brace\"}")
        );
        assert_eq!(parse_json_object::<Pick>(raw), Ok(Pick { id: "9".into() }));
    }

    #[test]
    fn escaped_quotes_and_nesting() {
        let raw = r#"{"id": "a \"quoted\" {", "inner": {"k": [1, {"z": 2}]}} trailing"#;
        let object = extract_json_object(raw).expect("object");
        assert!(object.ends_with("]}}"));
        assert!(parse_json_object::<Pick>(raw).is_ok());
    }

    #[test]
    fn unbalanced_or_missing() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{\"id\": \"1\""), None);
        assert_eq!(
            parse_json_object::<Pick>("I cannot help with that."),
            Err(JsonExtractError::NoObject)
        );
    }

    #[test]
    fn schema_mismatch_is_reported() {
        let err = parse_json_object::<Pick>("{\"id\": 12}").unwrap_err();
        assert!(matches!(err, JsonExtractError::Schema(_)));
    }
}
