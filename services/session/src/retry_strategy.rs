use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use rand::Rng;
use shared::errors::{ErrorKind, SessionError};
use std::time::Duration;

/// Rate-limit retry policy: `max_retries` retries, the n-th waiting
/// `base_delay * 2^n` plus up to a quarter of that again as jitter.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryStrategy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Deterministic doubling schedule; jitter is added separately
    pub fn create_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_randomization_factor(0.0)
            .with_multiplier(2.0)
            .with_max_interval(Duration::from_secs(3600))
            .with_max_elapsed_time(None)
            .build();
        backoff.reset();
        backoff
    }

    /// Next cooldown from a schedule created by [`RetryStrategy::create_backoff`]
    pub fn next_delay(&self, backoff: &mut ExponentialBackoff) -> Duration {
        backoff.next_backoff().unwrap_or(self.base_delay)
    }

    pub fn jitter(&self, delay: Duration) -> Duration {
        let max_ms = (delay.as_millis() as u64) / 4;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Whether the endpoint told us to slow down
    pub fn is_rate_limited(&self, error: &SessionError) -> bool {
        match error.kind {
            ErrorKind::RateLimited => true,
            ErrorKind::NetworkError => is_rate_limit_message(&error.full_text()),
            _ => false,
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(
            shared::constants::RPC_DEFAULT_MAX_RETRIES,
            Duration::from_millis(shared::constants::RPC_DEFAULT_BASE_DELAY_MS),
        )
    }
}

/// Status phrasings that carry HTTP 429; bare digits also occur inside base58 text
const STATUS_429_PATTERNS: &[&str] = &[
    "429 ",
    "(429)",
    "status 429",
    "status: 429",
    "code: 429",
    "code 429",
];

/// Message patterns RPC providers use for throttling
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.ends_with(" 429")
        || STATUS_429_PATTERNS.iter().any(|pattern| lower.contains(pattern))
        || lower.contains("too many requests")
        || lower.contains("rate limit")
        || lower.contains("rate-limit")
        || lower.contains("ratelimit")
}
