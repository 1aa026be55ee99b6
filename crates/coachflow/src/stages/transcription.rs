use crate::jobs::error_codes::ErrorCode;
use crate::jobs::model::{Job, JobOptions, NewJob};
use crate::jobs::payload::{FeedbackJobPayload, TranscriptionJobPayload, STAGE_FEEDBACK};
use crate::providers::{PollStatus, ProviderError, StartedTranscription, TranscriptResult,
    TranscriptionProvider};
use crate::stages::{PollConfig, StageDeps, StageError};
use serde_json::json;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The polling bound was reached without the provider ever reporting a
    /// terminal status. Not a provider-reported failure.
    #[error("polling timed out after {attempts} status checks - transcription took too long")]
    PollingTimeout { attempts: u32 },
}

/// Drive one provider to a transcript: a single round trip for synchronous
/// backends, a bounded fixed-interval poll loop for asynchronous ones.
pub async fn transcribe(
    provider: &dyn TranscriptionProvider,
    file_url: &str,
    poll: &PollConfig,
) -> Result<TranscriptResult, TranscribeError> {
    match provider.start(file_url).await? {
        StartedTranscription::Completed(result) => Ok(result),
        StartedTranscription::Accepted { external_id } => {
            for attempt in 0..poll.max_attempts {
                if attempt > 0 {
                    tokio::time::sleep(poll.interval).await;
                }

                match provider.check(&external_id).await? {
                    PollStatus::Completed(result) => return Ok(result),
                    PollStatus::Failed { reason } => {
                        return Err(ProviderError::Failed {
                            provider: provider.name().to_string(),
                            reason,
                        }
                        .into());
                    }
                    PollStatus::Pending | PollStatus::Processing => {}
                }
            }

            Err(TranscribeError::PollingTimeout {
                attempts: poll.max_attempts,
            })
        }
    }
}

pub async fn run(job: &Job, deps: &StageDeps) -> Result<serde_json::Value, StageError> {
    let payload: TranscriptionJobPayload =
        serde_json::from_value(job.payload.clone()).map_err(|e| {
            StageError::new(ErrorCode::Validation, format!("invalid transcription payload: {e}"))
        })?;

    info!(
        file_id = %payload.file_id,
        transcription_id = %payload.transcription_id,
        provider = deps.stt.name(),
        "starting transcription"
    );

    let Some(entity) = deps.transcriptions.get(payload.transcription_id).await? else {
        return Err(StageError::new(
            ErrorCode::EntityMissing,
            format!("transcription {} not found", payload.transcription_id),
        ));
    };

    deps.transcriptions
        .mark_processing(entity.id, deps.stt.name())
        .await?;
    deps.runner.report_progress(job.id, 25, "preparing").await;

    let outcome = transcribe(deps.stt.as_ref(), &payload.file_url, &deps.poll).await;
    deps.runner.report_progress(job.id, 70, "transcribing").await;

    match outcome {
        Ok(result) => {
            deps.transcriptions
                .complete_transcript(
                    entity.id,
                    &result.text,
                    result.language.as_deref(),
                    result.confidence,
                    &result.metadata,
                )
                .await?;
            deps.runner
                .report_progress(job.id, 100, "transcription_completed")
                .await;

            // The sole mechanism chaining the two stages. Dedupe on the
            // transcription id makes the chain exactly-once even if a stale
            // retry of this handler runs to completion again.
            let feedback_payload = serde_json::to_value(FeedbackJobPayload {
                transcription_id: entity.id,
                text: result.text.clone(),
                user_id: payload.user_id.clone(),
                file_id: payload.file_id.clone(),
            })
            .map_err(|e| StageError::new(ErrorCode::Unknown, e.to_string()))?;

            let feedback_job_id = deps
                .jobs
                .enqueue(NewJob {
                    queue: deps.queue.clone(),
                    stage: STAGE_FEEDBACK.to_string(),
                    payload: feedback_payload,
                    options: JobOptions {
                        dedupe_key: Some(format!("feedback:{}", entity.id)),
                        ..JobOptions::default()
                    },
                })
                .await
                .map_err(|e| {
                    StageError::new(ErrorCode::Unknown, format!("enqueue feedback job: {e}"))
                })?;

            info!(
                transcription_id = %entity.id,
                %feedback_job_id,
                "transcription completed, feedback job queued"
            );

            Ok(json!({
                "transcriptionId": entity.id,
                "fileId": payload.file_id,
                "feedbackJobId": feedback_job_id,
            }))
        }
        Err(TranscribeError::PollingTimeout { attempts }) => {
            let message =
                format!("polling timed out after {attempts} status checks - transcription took too long");
            deps.transcriptions.fail_transcript(entity.id, &message).await?;
            Err(StageError::new(ErrorCode::PollingTimeout, message))
        }
        Err(TranscribeError::Provider(err)) => {
            let message = err.to_string();
            deps.transcriptions.fail_transcript(entity.id, &message).await?;
            Err(StageError {
                code: err.code(),
                message,
            })
        }
    }
}
