use crate::providers::transcription::{
    ProviderError, StartedTranscription, TranscriptResult, TranscriptionProvider,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const PROVIDER: &str = "whisper";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Synchronous transcription via an OpenAI-compatible `audio/transcriptions`
/// endpoint: fetch the media from its signed URL, upload it, get the text in
/// one round trip.
pub struct WhisperProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    language: Option<String>,
    duration: Option<f64>,
}

impl WhisperProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            model,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TranscriptionProvider for WhisperProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn start(&self, file_url: &str) -> Result<StartedTranscription, ProviderError> {
        let media = self
            .http
            .get(file_url)
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;

        if !media.status().is_success() {
            return Err(ProviderError::Api {
                provider: PROVIDER.to_string(),
                status: media.status().as_u16(),
                body: format!("media download from {file_url} failed"),
            });
        }

        let bytes = media
            .bytes()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;

        let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name("media");
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        let resp = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let body: WhisperResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: e.to_string(),
            })?;

        Ok(StartedTranscription::Completed(TranscriptResult {
            text: body.text,
            language: body.language,
            confidence: None,
            metadata: json!({
                "model": self.model,
                "durationSeconds": body.duration,
            }),
        }))
    }
}
