use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Backoff ceiling. The per-job base comes from the job itself.
    pub max_delay_ms: i64,
    /// Jitter as a fraction of the delay. 0 keeps the exponential schedule exact.
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_delay_ms: 15 * 60 * 1000,
            jitter_pct: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Terminal,
}

/// Retry-vs-terminal decision for a failed attempt.
///
/// Polling timeouts, parse failures and an exhausted fallback chain are not
/// helped by re-running the handler; transport-level provider failures are.
/// Unknown codes default to retryable so a new failure mode never strands a
/// job without at least exercising its attempt budget.
pub fn classify_error(code: &str) -> ErrorClass {
    match code.trim().to_uppercase().as_str() {
        "VALIDATION" | "POLLING_TIMEOUT" | "PARSE" | "FALLBACK_EXHAUSTED" => ErrorClass::Terminal,
        _ => ErrorClass::Retryable,
    }
}

/// Delay before the n-th retry: `base * 2^(attempts_made - 1)`, capped, with
/// optional jitter. The first failed attempt waits exactly the base delay.
pub fn next_delay_ms(attempts_made: i32, base_ms: i64, cfg: &RetryConfig, rng: &mut impl Rng) -> i64 {
    let attempts_made = attempts_made.max(1) as u32;
    let exp = attempts_made.saturating_sub(1);

    // 2^exp with overflow protection; the cap absorbs absurd exponents
    let pow2 = 1_i64.checked_shl(exp).unwrap_or(i64::MAX);
    let mut delay = base_ms.saturating_mul(pow2);

    if delay > cfg.max_delay_ms {
        delay = cfg.max_delay_ms;
    }

    if cfg.jitter_pct > 0.0 {
        let jitter_range = (delay as f64) * cfg.jitter_pct;
        let jitter = rng.gen_range(-jitter_range..=jitter_range);
        delay = (delay as f64 + jitter).round() as i64;
    }

    delay.clamp(0, cfg.max_delay_ms)
}
