use crate::providers::transcription::{
    PollStatus, ProviderError, StartedTranscription, TranscriptResult, TranscriptionProvider,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

const PROVIDER: &str = "assemblyai";
const DEFAULT_BASE_URL: &str = "https://api.assemblyai.com";

/// Asynchronous transcription: submit the audio URL, then poll the transcript
/// resource until it reaches a terminal status.
pub struct AssemblyAiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

impl AssemblyAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn read_body(resp: reqwest::Response) -> Result<Value, ProviderError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        resp.json().await.map_err(|e| ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl TranscriptionProvider for AssemblyAiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn start(&self, file_url: &str) -> Result<StartedTranscription, ProviderError> {
        let resp = self
            .http
            .post(format!("{}/v2/transcript", self.base_url))
            .header("authorization", &self.api_key)
            .json(&json!({ "audio_url": file_url }))
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;

        let body = Self::read_body(resp).await?;
        let submitted: SubmitResponse =
            serde_json::from_value(body).map_err(|e| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: e.to_string(),
            })?;

        Ok(StartedTranscription::Accepted {
            external_id: submitted.id,
        })
    }

    async fn check(&self, external_id: &str) -> Result<PollStatus, ProviderError> {
        let resp = self
            .http
            .get(format!("{}/v2/transcript/{external_id}", self.base_url))
            .header("authorization", &self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;

        let body = Self::read_body(resp).await?;

        match body.get("status").and_then(Value::as_str) {
            Some("queued") => Ok(PollStatus::Pending),
            Some("processing") => Ok(PollStatus::Processing),
            Some("completed") => Ok(PollStatus::Completed(TranscriptResult {
                text: body
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                language: body
                    .get("language_code")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                confidence: body.get("confidence").and_then(Value::as_f64),
                metadata: body.clone(),
            })),
            Some("error") | Some("failed") => Ok(PollStatus::Failed {
                reason: body
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("provider reported an error")
                    .to_string(),
            }),
            other => Err(ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: format!("unexpected transcript status {other:?}"),
            }),
        }
    }
}
