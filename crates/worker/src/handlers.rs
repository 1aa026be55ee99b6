use anyhow::Context;
use coachflow::config::Config;
use coachflow::jobs::payload::{STAGE_FEEDBACK, STAGE_TRANSCRIPTION};
use coachflow::providers::{
    AssemblyAiProvider, ChatCompletionsProvider, FallbackChain, FeedbackProvider,
    MockFeedbackProvider, MockTranscriptionProvider, TranscriptionProvider, WhisperProvider,
};
use coachflow::stages;
use coachflow::worker::{boxed, HandlerRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub fn build_stt_provider(cfg: &Config) -> anyhow::Result<Arc<dyn TranscriptionProvider>> {
    match cfg.stt_provider.as_str() {
        "whisper" => {
            let api_key = cfg
                .openai_api_key
                .clone()
                .context("COACHFLOW_OPENAI_API_KEY is required for the whisper provider")?;
            let mut provider = WhisperProvider::new(api_key, cfg.whisper_model.clone());
            if let Some(base) = &cfg.openai_base_url {
                provider = provider.with_base_url(base.clone());
            }
            Ok(Arc::new(provider))
        }
        "assemblyai" => {
            let api_key = cfg
                .assemblyai_api_key
                .clone()
                .context("COACHFLOW_ASSEMBLYAI_API_KEY is required for the assemblyai provider")?;
            let mut provider = AssemblyAiProvider::new(api_key);
            if let Some(base) = &cfg.assemblyai_base_url {
                provider = provider.with_base_url(base.clone());
            }
            Ok(Arc::new(provider))
        }
        "mock" => Ok(Arc::new(MockTranscriptionProvider::synchronous(
            "this is a mock transcript for local runs",
        ))),
        other => anyhow::bail!("unknown transcription provider: {other}"),
    }
}

pub fn build_coach_chain(cfg: &Config) -> anyhow::Result<FallbackChain> {
    if let Some(api_key) = &cfg.coach_api_key {
        let providers = cfg
            .coach_models
            .iter()
            .map(|model| {
                let mut provider = ChatCompletionsProvider::new(api_key.clone(), model.clone());
                if let Some(base) = &cfg.coach_base_url {
                    provider = provider.with_base_url(base.clone());
                }
                Arc::new(provider) as Arc<dyn FeedbackProvider>
            })
            .collect();
        return Ok(FallbackChain::new(providers));
    }

    if cfg.stt_provider == "mock" {
        warn!("no coach API key configured, using a mock feedback provider");
        return Ok(FallbackChain::single(Arc::new(
            MockFeedbackProvider::succeeding(
                "mock-coach",
                r#"<feedback_json>{"summary":"mock feedback"}</feedback_json><advice>Keep practicing.</advice>"#,
            ),
        )));
    }

    anyhow::bail!("COACHFLOW_COACH_API_KEY (or OPENAI_API_KEY) is required")
}

pub fn build_registry(cfg: &Config) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();

    // the poll bound dominates the transcription stage's worst case
    let transcription_timeout =
        Duration::from_secs(cfg.poll_interval_secs * u64::from(cfg.poll_max_attempts) + 120);

    registry.register_with_timeout(
        STAGE_TRANSCRIPTION,
        |job, deps| boxed(stages::transcription::run(job, deps)),
        transcription_timeout,
    );
    registry.register_with_timeout(
        STAGE_FEEDBACK,
        |job, deps| boxed(stages::feedback::run(job, deps)),
        Duration::from_secs(180),
    );

    Arc::new(registry)
}
