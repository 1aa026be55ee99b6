/// Central runtime configuration, loaded from environment variables.
///
/// Every knob accepts a `COACHFLOW_`-prefixed variable with an unprefixed
/// fallback, so the worker can share an env file with other services.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub queue: String,
    pub concurrency: usize,
    pub lease_seconds: i64,
    pub heartbeat_seconds: u64,
    pub reap_interval_ms: u64,
    pub admin_addr: Option<String>,
    pub migrate_on_startup: bool,
    pub max_payload_bytes: usize,

    // transcription provider selection + credentials
    pub stt_provider: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub whisper_model: String,
    pub assemblyai_api_key: Option<String>,
    pub assemblyai_base_url: Option<String>,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,

    // feedback fallback chain
    pub coach_models: Vec<String>,
    pub coach_api_key: Option<String>,
    pub coach_base_url: Option<String>,

    pub retry_jitter_pct: f64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_or_fallback("COACHFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let queue =
            env_or_fallback("COACHFLOW_QUEUE", "QUEUE").unwrap_or_else(|| "tasks".to_string());

        let concurrency = env_or_fallback("COACHFLOW_CONCURRENCY", "CONCURRENCY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(4);

        let lease_seconds = env_or_fallback("COACHFLOW_LEASE_SECONDS", "LEASE_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        // a third of the lease keeps long provider calls safely inside it
        let heartbeat_seconds = env_or_fallback("COACHFLOW_HEARTBEAT_SECONDS", "HEARTBEAT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or((lease_seconds as u64 / 3).max(1));

        let reap_interval_ms = env_or_fallback("COACHFLOW_REAP_INTERVAL_MS", "REAP_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(5_000);

        let admin_addr = env_or_fallback("COACHFLOW_ADMIN_ADDR", "ADMIN_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("COACHFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let max_payload_bytes = env_or_fallback("COACHFLOW_MAX_PAYLOAD_BYTES", "MAX_PAYLOAD_BYTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(256 * 1024);

        let stt_provider = env_or_fallback("COACHFLOW_STT_PROVIDER", "STT_PROVIDER")
            .unwrap_or_else(|| "assemblyai".to_string());

        let openai_api_key = env_or_fallback("COACHFLOW_OPENAI_API_KEY", "OPENAI_API_KEY");
        let openai_base_url = env_or_fallback("COACHFLOW_OPENAI_BASE_URL", "OPENAI_BASE_URL");
        let whisper_model = env_or_fallback("COACHFLOW_WHISPER_MODEL", "WHISPER_MODEL")
            .unwrap_or_else(|| "whisper-1".to_string());

        let assemblyai_api_key =
            env_or_fallback("COACHFLOW_ASSEMBLYAI_API_KEY", "ASSEMBLYAI_API_KEY");
        let assemblyai_base_url =
            env_or_fallback("COACHFLOW_ASSEMBLYAI_BASE_URL", "ASSEMBLYAI_BASE_URL");

        let poll_interval_secs = env_or_fallback("COACHFLOW_POLL_INTERVAL_SECS", "POLL_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let poll_max_attempts = env_or_fallback("COACHFLOW_POLL_MAX_ATTEMPTS", "POLL_MAX_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(40);

        let coach_models = env_or_fallback("COACHFLOW_COACH_MODELS", "COACH_MODELS")
            .map(|s| {
                s.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec!["gpt-4o".to_string()]);

        let coach_api_key = env_or_fallback("COACHFLOW_COACH_API_KEY", "COACH_API_KEY")
            .or_else(|| openai_api_key.clone());
        let coach_base_url = env_or_fallback("COACHFLOW_COACH_BASE_URL", "COACH_BASE_URL");

        let retry_jitter_pct = env_or_fallback("COACHFLOW_RETRY_JITTER_PCT", "RETRY_JITTER_PCT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);

        Ok(Self {
            database_url,
            worker_id,
            queue,
            concurrency,
            lease_seconds,
            heartbeat_seconds,
            reap_interval_ms,
            admin_addr,
            migrate_on_startup,
            max_payload_bytes,
            stt_provider,
            openai_api_key,
            openai_base_url,
            whisper_model,
            assemblyai_api_key,
            assemblyai_base_url,
            poll_interval_secs,
            poll_max_attempts,
            coach_models,
            coach_api_key,
            coach_base_url,
            retry_jitter_pct,
        })
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
