use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub const STAGE_TRANSCRIPTION: &str = "transcription";
pub const STAGE_FEEDBACK: &str = "feedback";

/// Payload of a `transcription` job. `fileId`/`userId`/`fileUrl` are opaque
/// strings minted by the file-registration collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionJobPayload {
    pub file_id: String,
    pub transcription_id: Uuid,
    pub user_id: String,
    pub file_url: String,
}

/// Payload of a `feedback` job, enqueued by the transcription stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackJobPayload {
    pub transcription_id: Uuid,
    pub text: String,
    pub user_id: String,
    pub file_id: String,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid {stage} payload: {source}")]
    Payload {
        stage: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("payload for stage {stage} must be a JSON object")]
    NotAnObject { stage: String },
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
    #[error("payload exceeds {max} bytes ({actual})")]
    PayloadTooLarge { max: usize, actual: usize },
}

/// Structural validation at enqueue time. Known stages must deserialize into
/// their payload type; unknown stages only need an object payload so new job
/// types can be introduced without a lockstep deploy.
pub fn validate_stage_payload(stage: &str, payload: &Value) -> Result<(), ValidationError> {
    match stage {
        STAGE_TRANSCRIPTION => {
            let parsed: TranscriptionJobPayload = serde_json::from_value(payload.clone())
                .map_err(|source| ValidationError::Payload {
                    stage: stage.to_string(),
                    source,
                })?;
            if parsed.file_url.trim().is_empty() {
                return Err(ValidationError::EmptyField { field: "fileUrl" });
            }
            Ok(())
        }
        STAGE_FEEDBACK => {
            serde_json::from_value::<FeedbackJobPayload>(payload.clone()).map_err(|source| {
                ValidationError::Payload {
                    stage: stage.to_string(),
                    source,
                }
            })?;
            Ok(())
        }
        _ => {
            if payload.is_object() {
                Ok(())
            } else {
                Err(ValidationError::NotAnObject {
                    stage: stage.to_string(),
                })
            }
        }
    }
}
