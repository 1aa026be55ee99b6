//! Extraction of the structured report + advice paragraph from raw coach
//! output.
//!
//! Two formats are accepted:
//! 1. the tag-delimited contract the prompt asks for:
//!    `<feedback_json>{...}</feedback_json><advice>...</advice>`
//! 2. the legacy shape older prompts produced: a leading JSON object followed
//!    by free prose.
//! Markdown code fences around either part are tolerated. Anything else is a
//! `ParseError`, never a silent partial success.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackReport {
    pub summary: String,
    #[serde(default)]
    pub metrics: ReportMetrics,
    #[serde(default)]
    pub scores: ReportScores,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub practice_exercises: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encouragement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_tracking: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlighted_examples: Option<Vec<HighlightedExample>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetrics {
    #[serde(default)]
    pub total_words: u32,
    #[serde(default)]
    pub filler_words_count: u32,
    #[serde(default)]
    pub pace_words_per_minute: Option<u32>,
    #[serde(default)]
    pub avg_sentence_length: Option<u32>,
    #[serde(default)]
    pub long_pauses: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportScores {
    #[serde(default)]
    pub clarity: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub engagement: f64,
    #[serde(default)]
    pub structure: f64,
    #[serde(default)]
    pub language: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightedExample {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON object found in coach response")]
    MissingJson,
    #[error("coach JSON does not match the feedback schema: {0}")]
    Schema(#[source] serde_json::Error),
    #[error("<feedback_json> block is not valid JSON: {0}")]
    TaggedJson(#[source] serde_json::Error),
    #[error("missing closing tag </{0}>")]
    UnclosedTag(&'static str),
}

#[derive(Debug, Clone)]
pub struct ParsedFeedback {
    pub report: FeedbackReport,
    pub advice: String,
}

pub fn parse_coach_response(raw: &str) -> Result<ParsedFeedback, ParseError> {
    let cleaned = strip_code_fences(raw);

    // Preferred contract: explicit delimiter tags. If the tag is present we
    // commit to it: a broken tagged payload is an error, not a fallthrough.
    if let Some(json_block) = extract_tag(&cleaned, "feedback_json")? {
        let advice = extract_tag(&cleaned, "advice")?
            .map(|a| a.trim().to_string())
            .unwrap_or_default();
        let inner = strip_code_fences(json_block);
        let report: FeedbackReport =
            serde_json::from_str(&inner).map_err(ParseError::TaggedJson)?;
        return Ok(ParsedFeedback { report, advice });
    }

    // Legacy shape: leading JSON object, advice prose after it. The streaming
    // deserializer tells us exactly where the object ends, so braces inside
    // string values cannot confuse the split.
    let start = cleaned.find('{').ok_or(ParseError::MissingJson)?;
    let mut stream = serde_json::Deserializer::from_str(&cleaned[start..]).into_iter::<Value>();
    let value = match stream.next() {
        Some(Ok(v)) if v.is_object() => v,
        _ => return Err(ParseError::MissingJson),
    };
    let consumed = stream.byte_offset();

    let report: FeedbackReport = serde_json::from_value(value).map_err(ParseError::Schema)?;
    let advice = cleaned[start + consumed..]
        .replace("```", " ")
        .trim()
        .to_string();

    Ok(ParsedFeedback { report, advice })
}

/// Drop one level of markdown fencing (with optional info string) around the
/// whole input.
fn strip_code_fences(s: &str) -> String {
    let t = s.trim();
    if let Some(rest) = t.strip_prefix("```") {
        let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
        let body = body.trim_end();
        let body = body.strip_suffix("```").unwrap_or(body);
        return body.trim().to_string();
    }
    t.to_string()
}

fn extract_tag<'a>(s: &'a str, tag: &'static str) -> Result<Option<&'a str>, ParseError> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let Some(start) = s.find(&open) else {
        return Ok(None);
    };
    let after = &s[start + open.len()..];
    match after.find(&close) {
        Some(end) => Ok(Some(&after[..end])),
        None => Err(ParseError::UnclosedTag(tag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT_JSON: &str = r#"{
        "summary": "Clear and well paced overall.",
        "metrics": { "totalWords": 120, "fillerWordsCount": 4, "paceWordsPerMinute": 140 },
        "scores": { "clarity": 82, "confidence": 75, "engagement": 70, "structure": 80, "language": 85 },
        "strengths": ["good pacing"],
        "improvements": ["reduce fillers"],
        "suggestions": ["pause instead of saying um"]
    }"#;

    #[test]
    fn parses_tag_delimited_response() {
        let raw = format!(
            "<feedback_json>{REPORT_JSON}</feedback_json>\n<advice>Slow down at transitions and breathe.</advice>"
        );
        let parsed = parse_coach_response(&raw).unwrap();

        assert_eq!(parsed.report.summary, "Clear and well paced overall.");
        assert_eq!(parsed.report.metrics.total_words, 120);
        assert_eq!(parsed.report.scores.clarity, 82.0);
        assert_eq!(parsed.advice, "Slow down at transitions and breathe.");
    }

    #[test]
    fn parses_tagged_response_with_fenced_json_inside() {
        let raw = format!(
            "<feedback_json>```json\n{REPORT_JSON}\n```</feedback_json><advice>Keep it up.</advice>"
        );
        let parsed = parse_coach_response(&raw).unwrap();
        assert_eq!(parsed.advice, "Keep it up.");
    }

    #[test]
    fn parses_legacy_json_then_prose() {
        let raw = format!("{REPORT_JSON}\n\nYour delivery is solid; work on the opening.");
        let parsed = parse_coach_response(&raw).unwrap();

        assert_eq!(parsed.report.strengths, vec!["good pacing"]);
        assert_eq!(
            parsed.advice,
            "Your delivery is solid; work on the opening."
        );
    }

    #[test]
    fn parses_fence_wrapped_json_followed_by_prose() {
        let raw = format!("```json\n{REPORT_JSON}\n```\nPractice the close twice before recording.");
        let parsed = parse_coach_response(&raw).unwrap();

        assert!(!parsed.advice.is_empty());
        assert!(parsed.advice.contains("Practice the close"));
        assert_eq!(parsed.report.metrics.filler_words_count, 4);
    }

    #[test]
    fn braces_inside_strings_do_not_break_the_split() {
        let raw = r#"{ "summary": "mentions {braces} inline" } And here is the advice."#;
        let parsed = parse_coach_response(raw).unwrap();
        assert_eq!(parsed.report.summary, "mentions {braces} inline");
        assert_eq!(parsed.advice, "And here is the advice.");
    }

    #[test]
    fn plain_prose_is_a_parse_error() {
        let err = parse_coach_response("Great talk, keep going!").unwrap_err();
        assert!(matches!(err, ParseError::MissingJson));
    }

    #[test]
    fn schema_mismatch_is_a_parse_error() {
        // an object without "summary" does not satisfy the schema
        let err = parse_coach_response(r#"{ "score": 10 } advice here"#).unwrap_err();
        assert!(matches!(err, ParseError::Schema(_)));
    }

    #[test]
    fn unclosed_tag_is_reported() {
        let raw = format!("<feedback_json>{REPORT_JSON}");
        let err = parse_coach_response(&raw).unwrap_err();
        assert!(matches!(err, ParseError::UnclosedTag("feedback_json")));
    }

    #[test]
    fn broken_tagged_json_does_not_fall_back_to_legacy() {
        let raw = "<feedback_json>{ not json }</feedback_json><advice>x</advice>";
        let err = parse_coach_response(raw).unwrap_err();
        assert!(matches!(err, ParseError::TaggedJson(_)));
    }

    #[test]
    fn optional_sections_survive_roundtrip() {
        let raw = r#"{
            "summary": "ok",
            "practiceExercises": ["read aloud daily"],
            "encouragement": "nice work",
            "highlightedExamples": [ { "type": "filler", "text": "um", "context": "opening" } ]
        } advice"#;
        let parsed = parse_coach_response(raw).unwrap();
        let report = parsed.report;

        assert_eq!(
            report.practice_exercises.as_deref(),
            Some(&["read aloud daily".to_string()][..])
        );
        assert_eq!(report.encouragement.as_deref(), Some("nice work"));
        let examples = report.highlighted_examples.as_ref().unwrap();
        assert_eq!(examples[0].kind, "filler");

        // wire names survive serialization
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["practiceExercises"][0], "read aloud daily");
        assert_eq!(value["highlightedExamples"][0]["type"], "filler");
    }
}
