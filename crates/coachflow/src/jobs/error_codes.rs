/// Error-code vocabulary shared between stage handlers and the job store.
/// The store classifies these into retryable vs terminal (see `retry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Validation,
    ProviderTransport,
    ProviderFailed,
    PollingTimeout,
    Parse,
    FallbackExhausted,
    EntityMissing,
    Timeout,
    LeaseLost,
    Unknown,
}

impl ErrorCode {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "VALIDATION" => Self::Validation,
            "PROVIDER_TRANSPORT" => Self::ProviderTransport,
            "PROVIDER_FAILED" => Self::ProviderFailed,
            "POLLING_TIMEOUT" => Self::PollingTimeout,
            "PARSE" => Self::Parse,
            "FALLBACK_EXHAUSTED" => Self::FallbackExhausted,
            "ENTITY_MISSING" => Self::EntityMissing,
            "TIMEOUT" => Self::Timeout,
            "LEASE_LOST" => Self::LeaseLost,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::ProviderTransport => "PROVIDER_TRANSPORT",
            Self::ProviderFailed => "PROVIDER_FAILED",
            Self::PollingTimeout => "POLLING_TIMEOUT",
            Self::Parse => "PARSE",
            Self::FallbackExhausted => "FALLBACK_EXHAUSTED",
            Self::EntityMissing => "ENTITY_MISSING",
            Self::Timeout => "TIMEOUT",
            Self::LeaseLost => "LEASE_LOST",
            Self::Unknown => "UNKNOWN",
        }
    }
}
