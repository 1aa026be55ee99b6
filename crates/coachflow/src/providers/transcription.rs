use crate::jobs::error_codes::ErrorCode;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error calling {provider}: {message}")]
    Transport { provider: String, message: String },
    #[error("{provider} returned HTTP {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },
    /// The provider itself processed the request and reported a failure
    /// (bad audio, unsupported language, ...). Distinct from transport
    /// problems and from our own polling bound.
    #[error("{provider} reported failure: {reason}")]
    Failed { provider: String, reason: String },
    #[error("unusable response from {provider}: {message}")]
    Malformed { provider: String, message: String },
    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: String,
        operation: &'static str,
    },
}

impl ProviderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProviderError::Failed { .. } => ErrorCode::ProviderFailed,
            ProviderError::Unsupported { .. } => ErrorCode::Validation,
            _ => ErrorCode::ProviderTransport,
        }
    }

    pub(crate) fn transport(provider: &str, err: reqwest::Error) -> Self {
        ProviderError::Transport {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptResult {
    pub text: String,
    pub language: Option<String>,
    pub confidence: Option<f64>,
    pub metadata: Value,
}

/// What `start` handed back, and the tag the orchestration branches on.
/// Synchronous backends finish in one round trip; asynchronous backends
/// accept the work and get polled via `check`.
#[derive(Debug, Clone)]
pub enum StartedTranscription {
    Completed(TranscriptResult),
    Accepted { external_id: String },
}

#[derive(Debug, Clone)]
pub enum PollStatus {
    Pending,
    Processing,
    Completed(TranscriptResult),
    Failed { reason: String },
}

#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, file_url: &str) -> Result<StartedTranscription, ProviderError>;

    /// Only meaningful for providers whose `start` returned `Accepted`.
    async fn check(&self, external_id: &str) -> Result<PollStatus, ProviderError> {
        let _ = external_id;
        Err(ProviderError::Unsupported {
            provider: self.name().to_string(),
            operation: "status polling",
        })
    }
}

// ----------------------------
// Scripted mock for tests and local runs
// ----------------------------

enum MockStart {
    Sync(TranscriptResult),
    Fail(String),
    Transport(String),
    Accept { external_id: String },
}

pub struct MockTranscriptionProvider {
    name: String,
    start: MockStart,
    polls: Mutex<VecDeque<PollStatus>>,
}

impl MockTranscriptionProvider {
    /// Single-round-trip provider returning the given transcript.
    pub fn synchronous(text: &str) -> Self {
        Self {
            name: "mock".to_string(),
            start: MockStart::Sync(TranscriptResult {
                text: text.to_string(),
                language: Some("en".to_string()),
                confidence: Some(0.99),
                metadata: serde_json::json!({ "mock": true }),
            }),
            polls: Mutex::new(VecDeque::new()),
        }
    }

    /// Provider that reports a failure on start.
    pub fn failing(reason: &str) -> Self {
        Self {
            name: "mock".to_string(),
            start: MockStart::Fail(reason.to_string()),
            polls: Mutex::new(VecDeque::new()),
        }
    }

    /// Provider whose start call dies on the wire.
    pub fn transport_failing(message: &str) -> Self {
        Self {
            name: "mock".to_string(),
            start: MockStart::Transport(message.to_string()),
            polls: Mutex::new(VecDeque::new()),
        }
    }

    /// Polling provider replaying the given statuses in order; once the
    /// script runs out, every further check reports `Processing` (which is
    /// how a never-finishing job looks from the outside).
    pub fn polling(statuses: impl IntoIterator<Item = PollStatus>) -> Self {
        Self {
            name: "mock".to_string(),
            start: MockStart::Accept {
                external_id: "mock-external-1".to_string(),
            },
            polls: Mutex::new(statuses.into_iter().collect()),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

#[async_trait]
impl TranscriptionProvider for MockTranscriptionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, _file_url: &str) -> Result<StartedTranscription, ProviderError> {
        match &self.start {
            MockStart::Sync(result) => Ok(StartedTranscription::Completed(result.clone())),
            MockStart::Fail(reason) => Err(ProviderError::Failed {
                provider: self.name.clone(),
                reason: reason.clone(),
            }),
            MockStart::Transport(message) => Err(ProviderError::Transport {
                provider: self.name.clone(),
                message: message.clone(),
            }),
            MockStart::Accept { external_id } => Ok(StartedTranscription::Accepted {
                external_id: external_id.clone(),
            }),
        }
    }

    async fn check(&self, _external_id: &str) -> Result<PollStatus, ProviderError> {
        let mut polls = self.polls.lock().expect("mock poll lock poisoned");
        Ok(polls.pop_front().unwrap_or(PollStatus::Processing))
    }
}
