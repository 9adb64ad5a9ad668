//! JSON recovery from noisy model output.

use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no JSON object found in model output")]
    NoObject,
    #[error("JSON parse failed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Slice from the first `{` to the last `}` of `raw`.
///
/// Prose, markdown fences and trailing commentary around a single embedded
/// object are dropped.
pub fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

/// Parse the object embedded in `raw`.
///
/// Tries the outermost `{ .. }` span first. If trailing prose contains a stray
/// closing brace, falls back to the first balanced object.
pub fn parse_embedded<T: DeserializeOwned>(raw: &str) -> Result<T, ExtractError> {
    let span = extract_json(raw).ok_or(ExtractError::NoObject)?;
    match serde_json::from_str(span) {
        Ok(v) => Ok(v),
        Err(e) => match first_balanced_object(span) {
            Some(inner) if inner.len() < span.len() => Ok(serde_json::from_str(inner)?),
            _ => Err(ExtractError::Parse(e)),
        },
    }
}

/// Find the first balanced `{ .. }` object, respecting JSON strings.
fn first_balanced_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let s = &s[start..];
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn pure_json_is_returned_whole() {
        let input = r#"{"a": 1}"#;
        assert_eq!(extract_json(input), Some(input));
    }

    #[test]
    fn prose_around_object_does_not_change_parse() {
        let embedded = r#"{"project_name": "tasks", "backend": {"server.js": "entry"}}"#;
        let noisy = format!("Sure! Here is the blueprint:\n```json\n{embedded}\n```\nEnjoy.");

        let a: Value = parse_embedded(&noisy).unwrap();
        let b: Value = serde_json::from_str(embedded).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_braces_is_no_object() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("} backwards {").is_none());
        assert!(matches!(
            parse_embedded::<Value>("nothing"),
            Err(ExtractError::NoObject)
        ));
    }

    #[test]
    fn stray_trailing_brace_falls_back_to_balanced_object() {
        let raw = r#"{"weaving_score": 8} note: use {braces} carefully }"#;
        let v: Value = parse_embedded(raw).unwrap();
        assert_eq!(v["weaving_score"], 8);
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let raw = r#"{"purpose": "renders {items}"} trailing }"#;
        let v: Value = parse_embedded(raw).unwrap();
        assert_eq!(v["purpose"], "renders {items}");
    }
}
