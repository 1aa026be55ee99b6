pub mod feedback;
pub mod metrics;
pub mod parse;
pub mod transcription;

use crate::jobs::error_codes::ErrorCode;
use crate::jobs::{JobRunner, JobsRepo};
use crate::providers::{FallbackChain, TranscriptionProvider};
use crate::transcriptions::TranscriptionsRepo;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Bounded wait for asynchronous transcription backends. Defaults match the
/// production bound: 40 checks, 30 s apart, roughly twenty minutes total.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_attempts: 40,
        }
    }
}

/// Everything a stage handler needs, shared across the worker pool.
#[derive(Clone)]
pub struct StageDeps {
    /// Queue chained jobs are enqueued into.
    pub queue: String,
    pub jobs: JobsRepo,
    pub transcriptions: TranscriptionsRepo,
    pub runner: JobRunner,
    pub stt: Arc<dyn TranscriptionProvider>,
    pub coach: FallbackChain,
    pub poll: PollConfig,
}

/// Stage outcome error: a code the job store classifies into retryable vs
/// terminal, plus the operator-facing message.
#[derive(Debug)]
pub struct StageError {
    pub code: ErrorCode,
    pub message: String,
}

impl StageError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for StageError {}

impl From<crate::providers::ProviderError> for StageError {
    fn from(err: crate::providers::ProviderError) -> Self {
        StageError {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

// Infrastructure errors (repo/db) default to retryable.
impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        StageError {
            code: ErrorCode::Unknown,
            message: err.to_string(),
        }
    }
}
