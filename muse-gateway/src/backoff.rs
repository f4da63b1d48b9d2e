//! Reconnect pacing.

use std::time::Duration;

/// Calculate backoff duration with exponential increase.
///
/// # Arguments
/// * `attempt` - Current attempt number (0-indexed).
/// * `base_ms` - Base delay in milliseconds.
/// * `max_ms` - Maximum delay in milliseconds.
pub fn exponential_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay_ms.min(max_ms))
}

/// Add uniform random jitter to a duration.
///
/// # Arguments
/// * `duration` - Base duration.
/// * `jitter_factor` - Factor of jitter (0.0 = no jitter, 1.0 = up to 100%).
pub fn with_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    use rand::Rng;

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let jitter_range = (duration.as_millis() as f64 * jitter_factor) as u64;
    let jitter = rand::rng().random_range(0..=jitter_range);
    duration + Duration::from_millis(jitter)
}

/// Delay before re-identifying after an INVALID_SESSION: uniform in 1-5s.
pub fn invalid_session_delay() -> Duration {
    use rand::Rng;
    Duration::from_millis(rand::rng().random_range(1_000..=5_000))
}
