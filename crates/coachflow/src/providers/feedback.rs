use crate::providers::transcription::ProviderError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[async_trait]
pub trait FeedbackProvider: Send + Sync {
    /// Name recorded in entity metadata (`coachModel`) when this provider's
    /// response is the one that gets persisted.
    fn name(&self) -> &str;

    async fn generate(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, ProviderError>;
}

/// OpenAI-compatible `/chat/completions` backend. Temperature is kept low and
/// output bounded: the response must stay machine-parseable.
pub struct ChatCompletionsProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

impl ChatCompletionsProvider {
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
impl FeedbackProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ProviderError> {
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system_prompt },
                    { "role": "user", "content": user_prompt },
                ],
                "temperature": 0.2,
                "max_tokens": 1200,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::transport(&self.model, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: self.model.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = resp.json().await.map_err(|e| ProviderError::Malformed {
            provider: self.model.clone(),
            message: e.to_string(),
        })?;

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::Malformed {
                provider: self.model.clone(),
                message: "no message content in completion".to_string(),
            })?;

        Ok(content.to_string())
    }
}

/// Scripted mock for tests and local runs.
pub struct MockFeedbackProvider {
    name: String,
    response: Result<String, String>,
}

impl MockFeedbackProvider {
    pub fn succeeding(name: &str, response: &str) -> Self {
        Self {
            name: name.to_string(),
            response: Ok(response.to_string()),
        }
    }

    pub fn failing(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            response: Err(reason.to_string()),
        }
    }
}

#[async_trait]
impl FeedbackProvider for MockFeedbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<String, ProviderError> {
        match &self.response {
            Ok(raw) => Ok(raw.clone()),
            Err(reason) => Err(ProviderError::Failed {
                provider: self.name.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoachResponse {
    pub raw: String,
    /// Which provider in the chain produced it.
    pub provider: String,
}

#[derive(Debug, Error)]
#[error("all feedback providers failed: {}", .failures.join("; "))]
pub struct FallbackExhausted {
    pub failures: Vec<String>,
}

/// Ordered providers tried in turn; the first non-empty response wins. An
/// empty response counts as a failure and the chain moves on.
#[derive(Clone)]
pub struct FallbackChain {
    providers: Vec<Arc<dyn FeedbackProvider>>,
}

impl FallbackChain {
    pub fn new(providers: Vec<Arc<dyn FeedbackProvider>>) -> Self {
        Self { providers }
    }

    pub fn single(provider: Arc<dyn FeedbackProvider>) -> Self {
        Self {
            providers: vec![provider],
        }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<CoachResponse, FallbackExhausted> {
        let mut failures = Vec::new();

        for provider in &self.providers {
            match provider.generate(system_prompt, user_prompt).await {
                Ok(raw) if !raw.trim().is_empty() => {
                    return Ok(CoachResponse {
                        raw,
                        provider: provider.name().to_string(),
                    });
                }
                Ok(_) => {
                    warn!(provider = provider.name(), "empty feedback response, trying next");
                    failures.push(format!("{}: empty response", provider.name()));
                }
                Err(err) => {
                    warn!(provider = provider.name(), %err, "feedback provider failed, trying next");
                    failures.push(format!("{}: {}", provider.name(), err));
                }
            }
        }

        Err(FallbackExhausted { failures })
    }
}
