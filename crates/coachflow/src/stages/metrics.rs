use serde::Serialize;

/// Single-token fillers. Deliberately narrow: discourse markers like "so"
/// carry real content too often to count blindly.
pub const FILLER_WORDS: &[&str] = &["um", "uh", "er", "ah", "like", "actually", "basically"];

/// Multi-token fillers matched as consecutive word pairs.
pub const FILLER_PHRASES: &[&[&str]] = &[&["you", "know"]];

/// Deterministic measurements computed from the transcript before any
/// generative backend sees it; they anchor the coach's scores in something
/// observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMetrics {
    pub total_words: u32,
    pub filler_words_count: u32,
    pub pace_words_per_minute: Option<u32>,
    pub avg_sentence_length: u32,
}

/// Pure: identical `(text, duration)` always yields identical metrics.
pub fn calculate_local_metrics(text: &str, duration_seconds: Option<f64>) -> LocalMetrics {
    let total_words = text.split_whitespace().count() as u32;

    // normalized tokens for filler matching: punctuation stripped, lowercased
    let tokens: Vec<String> = text
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
        })
        .collect();

    let mut filler_words_count = tokens
        .iter()
        .filter(|t| FILLER_WORDS.contains(&t.as_str()))
        .count() as u32;

    for phrase in FILLER_PHRASES {
        filler_words_count += tokens
            .windows(phrase.len())
            .filter(|w| w.iter().map(String::as_str).eq(phrase.iter().copied()))
            .count() as u32;
    }

    let pace_words_per_minute = duration_seconds
        .filter(|d| *d > 0.0)
        .map(|d| (total_words as f64 / d * 60.0).round() as u32);

    let sentence_count = text
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count() as u32;
    let avg_sentence_length = if sentence_count == 0 {
        0
    } else {
        (total_words as f64 / sentence_count as f64).round() as u32
    };

    LocalMetrics {
        total_words,
        filler_words_count,
        pace_words_per_minute,
        avg_sentence_length,
    }
}
