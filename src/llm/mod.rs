//! The LLM subsystem: wire types, the failover-capable HTTP client, and the
//! JSON-object extraction used to turn a completion's free text into an
//! [`crate::models::LlmAnalysis`].

pub mod client;
pub mod models;

pub use client::LlmClient;
pub use models::LlmOptions;

use std::collections::BTreeMap;

use crate::models::LlmAnalysis;

/// Extracts the first top-level JSON object found in `text` (an LLM
/// completion is plain text; the model is instructed to return JSON but may
/// wrap it in prose or a code fence) and parses it into an `LlmAnalysis`.
/// Missing fields default rather than fail: an absent `summary` becomes an
/// empty string, not a parse error.
pub fn parse_llm_analysis(text: &str) -> Option<LlmAnalysis> {
    let object_text = extract_first_json_object(text)?;
    let value: serde_json::Value = serde_json::from_str(&object_text).ok()?;

    let summary = value.get("summary").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let issues = value
        .get("issues")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let recommendations = value
        .get("recommendations")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let per_peg_notes: BTreeMap<String, String> = value
        .get("per_peg_notes")
        .and_then(|v| v.as_object())
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();
    let confidence = value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0).clamp(0.0, 1.0);
    let model_label = value.get("model_label").and_then(|v| v.as_str()).unwrap_or_default().to_string();

    Some(LlmAnalysis { summary, issues, recommendations, per_peg_notes, confidence, model_label })
}

fn extract_first_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=i].to_string());
                }
            },
            _ => {},
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_embedded_in_prose() {
        let text = "Here is the analysis:\n```json\n{\"summary\": \"ok\"}\n```\nThanks.";
        let analysis = parse_llm_analysis(text).unwrap();
        assert_eq!(analysis.summary, "ok");
    }

    #[test]
    fn missing_fields_default_rather_than_fail() {
        let analysis = parse_llm_analysis("{}").unwrap();
        assert_eq!(analysis.summary, "");
        assert!(analysis.issues.is_empty());
        assert_eq!(analysis.confidence, 0.0);
    }

    #[test]
    fn non_json_text_returns_none() {
        assert!(parse_llm_analysis("no json here at all").is_none());
    }

    #[test]
    fn nested_braces_in_strings_do_not_confuse_the_scanner() {
        let text = r#"{"summary": "uses { and } in text", "issues": []}"#;
        let analysis = parse_llm_analysis(text).unwrap();
        assert_eq!(analysis.summary, "uses { and } in text");
    }
}
