use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Pipeline entity shared by the two stages. Wire names (camelCase) match
/// what the read paths already serve to clients.
///
/// Write discipline: the transcription stage owns `provider`, `status`,
/// `text`, `language`, `confidence`; the feedback stage owns `feedback`,
/// `feedback_advice`, `feedback_status`. A failed feedback run never touches
/// a completed transcription's own fields.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    pub id: Uuid,
    pub file_id: String,
    pub user_id: String,
    pub provider: Option<String>,
    pub status: String,
    pub text: Option<String>,
    pub language: String,
    pub confidence: Option<f64>,
    pub error_message: Option<String>,
    pub metadata: Value,
    pub feedback: Option<Value>,
    pub feedback_advice: Option<String>,
    pub feedback_status: String,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "duration")]
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub enum TranscriptionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TranscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionStatus::Pending => "pending",
            TranscriptionStatus::Processing => "processing",
            TranscriptionStatus::Completed => "completed",
            TranscriptionStatus::Failed => "failed",
        }
    }
}

pub enum FeedbackStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FeedbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackStatus::Pending => "pending",
            FeedbackStatus::Processing => "processing",
            FeedbackStatus::Completed => "completed",
            FeedbackStatus::Failed => "failed",
        }
    }
}
