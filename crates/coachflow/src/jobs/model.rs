use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub queue: String,
    pub stage: String,
    pub payload: Value,
    pub state: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub backoff_base_ms: i64,
    pub dedupe_key: Option<String>,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
    pub run_at: DateTime<Utc>,

    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_expires_at: Option<DateTime<Utc>>,

    pub progress_percent: i32,
    pub progress_stage: Option<String>,

    pub result: Option<Value>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub failed_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue: String,
    pub stage: String,
    pub payload: Value,
    pub options: JobOptions,
}

/// Per-job retry/cleanup options, the wire-level `{ attempts, backoff, ... }`
/// block callers pass at enqueue time.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub max_attempts: i32,
    pub backoff_base_ms: i64,
    pub dedupe_key: Option<String>,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 5_000,
            dedupe_key: None,
            remove_on_complete: false,
            remove_on_fail: false,
        }
    }
}

pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}
