use crate::jobs::error_codes::ErrorCode;
use crate::jobs::model::Job;
use crate::jobs::payload::FeedbackJobPayload;
use crate::stages::metrics::{calculate_local_metrics, LocalMetrics};
use crate::stages::parse::parse_coach_response;
use crate::stages::{StageDeps, StageError};
use serde_json::json;
use tracing::info;

pub const SYSTEM_PROMPT: &str = "\
You are an expert public-speaking coach and presentation analyst.
STRICT RULE: reply with exactly two blocks and nothing else. First a <feedback_json>...</feedback_json> block \
containing a single JSON object matching the schema below, then an <advice>...</advice> block containing one \
plain-text paragraph of advice. No markdown fences, no labels, no surrounding text.

Schema:
{
  \"summary\": \"...\",
  \"metrics\": { \"totalWords\": 0, \"fillerWordsCount\": 0, \"paceWordsPerMinute\": null, \"avgSentenceLength\": 0 },
  \"scores\": { \"clarity\": 0-100, \"confidence\": 0-100, \"engagement\": 0-100, \"structure\": 0-100, \"language\": 0-100 },
  \"strengths\": [\"...\"],
  \"improvements\": [\"...\"],
  \"suggestions\": [\"...\"],
  \"practiceExercises\": [\"...\"],
  \"encouragement\": \"...\",
  \"highlightedExamples\": [ { \"type\": \"...\", \"text\": \"...\", \"context\": \"...\" } ]
}";

/// The measured metrics ride along in the prompt so the model's scores are
/// anchored to observable features instead of vibes.
pub fn build_user_prompt(
    text: &str,
    metrics: &LocalMetrics,
    duration_seconds: Option<f64>,
) -> String {
    let measured =
        serde_json::to_string(metrics).unwrap_or_else(|_| "{}".to_string());

    let mut prompt = format!(
        "Analyze the following transcript and produce structured feedback per the system instructions.\n\
         These metrics were measured directly from the transcript; do not contradict them:\n{measured}\n\n\
         Transcript:\n\"\"\"\n{text}\n\"\"\"\n"
    );

    if let Some(duration) = duration_seconds {
        prompt.push_str(&format!("\nMetadata: durationSeconds={duration}"));
    }

    prompt
}

pub async fn run(job: &Job, deps: &StageDeps) -> Result<serde_json::Value, StageError> {
    let payload: FeedbackJobPayload = serde_json::from_value(job.payload.clone()).map_err(|e| {
        StageError::new(ErrorCode::Validation, format!("invalid feedback payload: {e}"))
    })?;

    info!(transcription_id = %payload.transcription_id, "starting feedback analysis");
    deps.runner.report_progress(job.id, 5, "analyzing").await;

    let Some(entity) = deps.transcriptions.get(payload.transcription_id).await? else {
        return Err(StageError::new(
            ErrorCode::EntityMissing,
            format!("transcription {} not found", payload.transcription_id),
        ));
    };

    // The persisted transcript is the source of truth, not the job payload.
    let text = entity.text.clone().unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        let message = "no transcription text to analyze";
        deps.transcriptions
            .fail_feedback(entity.id, message, &json!({}))
            .await?;
        return Err(StageError::new(ErrorCode::Validation, message));
    }

    deps.transcriptions.set_feedback_processing(entity.id).await?;

    let metrics = calculate_local_metrics(text, entity.duration_seconds);
    deps.runner.report_progress(job.id, 25, "ai_processing").await;

    let user_prompt = build_user_prompt(text, &metrics, entity.duration_seconds);
    let response = match deps.coach.generate(SYSTEM_PROMPT, &user_prompt).await {
        Ok(response) => response,
        Err(exhausted) => {
            let message = exhausted.to_string();
            deps.transcriptions
                .fail_feedback(entity.id, &message, &json!({ "coachError": message.clone() }))
                .await?;
            return Err(StageError::new(ErrorCode::FallbackExhausted, message));
        }
    };

    deps.runner
        .report_progress(job.id, 70, "generating_feedback")
        .await;

    let parsed = match parse_coach_response(&response.raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            // keep the raw output around for diagnosis; the completed
            // transcription itself is untouched
            let message = err.to_string();
            deps.transcriptions
                .fail_feedback(
                    entity.id,
                    &message,
                    &json!({ "coachModel": response.provider.clone(), "coachRaw": response.raw.clone() }),
                )
                .await?;
            return Err(StageError::new(ErrorCode::Parse, message));
        }
    };

    let report = serde_json::to_value(&parsed.report)
        .map_err(|e| StageError::new(ErrorCode::Unknown, e.to_string()))?;

    deps.transcriptions
        .complete_feedback(
            entity.id,
            &report,
            &parsed.advice,
            &json!({ "coachModel": response.provider.clone(), "coachRaw": response.raw.clone() }),
        )
        .await?;
    deps.runner
        .report_progress(job.id, 100, "feedback_completed")
        .await;

    info!(
        transcription_id = %entity.id,
        coach_model = %response.provider,
        "feedback completed"
    );

    Ok(json!({
        "transcriptionId": entity.id,
        "feedbackStatus": "completed",
        "coachModel": response.provider,
    }))
}
