//! Parsing of free-form model replies into a [`Classification`].
//!
//! Two reply shapes are accepted: a JSON object
//! (`{"description": ..., "category": ..., "confidence": ...}`), possibly
//! wrapped in prose or code fences, and the older `TAGS: a, b, c` line.

use serde::Deserialize;

use super::Classification;
use crate::error::ClassificationError;

/// Confidence assigned when the model does not report one.
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

const MAX_SNIPPET_LEN: usize = 120;

#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Parses the text the model produced.
pub fn parse_reply(text: &str) -> Result<Classification, ClassificationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ClassificationError::EmptyResponse);
    }

    if let Some(json) = extract_json(text) {
        if let Ok(raw) = serde_json::from_str::<RawReply>(json) {
            return from_raw(raw);
        }
    }

    if let Some(idx) = text.find("TAGS:") {
        return from_tags(&text[idx + "TAGS:".len()..]);
    }

    Err(ClassificationError::MalformedResponse(format!(
        "expected a JSON object or a TAGS line, got '{}'",
        snippet(text)
    )))
}

fn from_raw(raw: RawReply) -> Result<Classification, ClassificationError> {
    let tags: Vec<String> = raw
        .tags
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let description = raw
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .or_else(|| (!tags.is_empty()).then(|| tags.join(", ")))
        .ok_or_else(|| {
            ClassificationError::MalformedResponse("reply has no description".to_string())
        })?;

    let category = raw
        .category
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .or_else(|| tags.first().cloned());

    let confidence = match raw.confidence {
        Some(c) if !c.is_finite() => {
            return Err(ClassificationError::MalformedResponse(format!(
                "confidence is not a number: {}",
                c
            )))
        }
        // Some models answer in percent.
        Some(c) if c > 1.0 && c <= 100.0 => (c / 100.0) as f32,
        Some(c) => c.clamp(0.0, 1.0) as f32,
        None => DEFAULT_CONFIDENCE,
    };

    Ok(Classification {
        description,
        category,
        confidence,
    })
}

fn from_tags(line: &str) -> Result<Classification, ClassificationError> {
    let line = line.lines().next().unwrap_or_default();
    let tags: Vec<&str> = line
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty() && !t.contains(char::is_whitespace))
        .collect();

    let first = tags.first().ok_or_else(|| {
        ClassificationError::MalformedResponse("TAGS line contains no tags".to_string())
    })?;

    Ok(Classification {
        description: tags.join(", "),
        category: Some(first.to_string()),
        confidence: DEFAULT_CONFIDENCE,
    })
}

/// Returns the first balanced `{ ... }` span, skipping braces inside strings.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

fn snippet(text: &str) -> String {
    if text.chars().count() > MAX_SNIPPET_LEN {
        let cut: String = text.chars().take(MAX_SNIPPET_LEN).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let c = parse_reply(
            r#"{"description": "A dog on a beach", "category": "Animals", "confidence": 0.9}"#,
        )
        .unwrap();
        assert_eq!(c.description, "A dog on a beach");
        assert_eq!(c.category.as_deref(), Some("Animals"));
        assert!((c.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_json_wrapped_in_prose_and_fences() {
        let text = "Sure! Here you go:\n```json\n{\"description\": \"curly {brace} text\", \"category\": \"Misc\"}\n```";
        let c = parse_reply(text).unwrap();
        assert_eq!(c.description, "curly {brace} text");
        assert_eq!(c.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_confidence_normalized() {
        let pct = parse_reply(r#"{"description": "x", "confidence": 85}"#).unwrap();
        assert!((pct.confidence - 0.85).abs() < 1e-6);

        let high = parse_reply(r#"{"description": "x", "confidence": 250}"#).unwrap();
        assert_eq!(high.confidence, 1.0);

        let low = parse_reply(r#"{"description": "x", "confidence": -0.2}"#).unwrap();
        assert_eq!(low.confidence, 0.0);
    }

    #[test]
    fn test_json_tags_fallback() {
        let c = parse_reply(r#"{"tags": ["sunset", "beach"]}"#).unwrap();
        assert_eq!(c.description, "sunset, beach");
        assert_eq!(c.category.as_deref(), Some("sunset"));
    }

    #[test]
    fn test_blank_category_is_none() {
        let c = parse_reply(r#"{"description": "x", "category": "  "}"#).unwrap();
        assert!(c.category.is_none());
    }

    #[test]
    fn test_legacy_tags_line() {
        let c = parse_reply("TAGS: sunset, beach, two words, ocean").unwrap();
        assert_eq!(c.description, "sunset, beach, ocean");
        assert_eq!(c.category.as_deref(), Some("sunset"));
        assert_eq!(c.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_empty_reply() {
        assert_eq!(parse_reply("   \n"), Err(ClassificationError::EmptyResponse));
    }

    #[test]
    fn test_malformed_replies() {
        assert!(matches!(
            parse_reply("I cannot see any image."),
            Err(ClassificationError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"category": "Animals"}"#),
            Err(ClassificationError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_reply("TAGS: ,  , "),
            Err(ClassificationError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_reply("{\"description\": \"unterminated"),
            Err(ClassificationError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_extract_json_handles_escaped_quotes() {
        let text = r#"noise {"a": "quote \" and }"} trailing"#;
        assert_eq!(extract_json(text), Some(r#"{"a": "quote \" and }"}"#));
        assert_eq!(extract_json("no braces"), None);
    }
}
