//! Endpoint-bucket rate limiting and retry.
//!
//! The provider advertises per-bucket quotas via response headers; on top
//! of that the transport enforces a global minimum spacing between calls
//! so a burst of lookups never looks like automation. Waits are tracked on
//! the tokio clock so the pacing properties are testable under a paused
//! runtime.

use crate::error::HttpError;
use crate::routes::Endpoint;
use dashmap::DashMap;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

/// Default minimum spacing between any two API calls.
pub const DEFAULT_MIN_SPACING: Duration = Duration::from_millis(350);

/// Statuses retried by default: transient server failures.
pub const SERVER_ERROR_STATUSES: &[u16] = &[500, 502, 503, 504];

/// Base delay for exponential retry backoff.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Cap for exponential retry backoff.
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// A rate limit bucket for one endpoint template.
struct Bucket {
    /// Remaining requests before the bucket resets.
    remaining: Mutex<u32>,
    /// When the bucket resets.
    reset_at: Mutex<Instant>,
    /// Serializes waiters on the same endpoint.
    semaphore: Semaphore,
}

/// Rate limiter for API requests.
///
/// Buckets live for the process; keys are canonical endpoint templates so
/// every concrete path of an endpoint shares one bucket.
pub struct RateLimiter {
    /// Per-endpoint buckets.
    buckets: DashMap<&'static str, Arc<Bucket>>,
    /// Minimum spacing between any two calls.
    min_spacing: Duration,
    /// Next instant a call may go out (global spacing reservation).
    next_slot: Mutex<Option<Instant>>,
    /// Global rate limit expiry (set on a global 429).
    global_until: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a rate limiter with the default 350ms spacing.
    pub fn new() -> Self {
        Self::with_spacing(DEFAULT_MIN_SPACING)
    }

    /// Create a rate limiter with custom global spacing.
    pub fn with_spacing(min_spacing: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            min_spacing,
            next_slot: Mutex::new(None),
            global_until: Mutex::new(None),
        }
    }

    /// Wait until a request to `endpoint` may be sent.
    ///
    /// Honors, in order: an active global 429 window, the endpoint
    /// bucket's advertised quota, and the global minimum spacing. Callers
    /// hitting the same endpoint are serialized.
    pub async fn wait(&self, endpoint: Endpoint) -> Result<(), HttpError> {
        // Global 429 window
        let until = { *self.global_until.lock() };
        if let Some(until) = until {
            if Instant::now() < until {
                sleep_until(until).await;
            }
        }

        let bucket = self.bucket(endpoint);

        // Serialize same-endpoint waiters
        let _permit = bucket
            .semaphore
            .acquire()
            .await
            .map_err(|_| HttpError::ClientError("Rate limit semaphore closed".to_string()))?;

        // Exhausted bucket: suspend until the advertised reset
        let wait = {
            let remaining = *bucket.remaining.lock();
            if remaining == 0 {
                let reset_at = *bucket.reset_at.lock();
                (Instant::now() < reset_at).then(|| reset_at)
            } else {
                None
            }
        };

        if let Some(reset_at) = wait {
            debug!(
                endpoint = endpoint.template(),
                wait_ms = (reset_at - Instant::now()).as_millis(),
                "Bucket exhausted, waiting for reset"
            );
            sleep_until(reset_at).await;
            // One probe request after reset rediscovers the quota.
            *bucket.remaining.lock() = 1;
        }

        // Global minimum spacing: reserve the next slot
        let slot = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let at = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(at + self.min_spacing);
            at
        };

        if slot > Instant::now() {
            sleep_until(slot).await;
        }

        Ok(())
    }

    /// Update bucket state from response headers.
    ///
    /// Recognizes `X-RateLimit-Remaining`, `X-RateLimit-Reset-After`
    /// (seconds, fractional), `X-RateLimit-Reset` (unix epoch seconds, used
    /// only when `Reset-After` is absent), and `Retry-After`.
    pub fn update(&self, endpoint: Endpoint, headers: &HeaderMap) {
        let bucket = self.bucket(endpoint);

        if let Some(remaining) = header_value::<u32>(headers, "x-ratelimit-remaining") {
            *bucket.remaining.lock() = remaining;
        }

        let reset_after = header_value::<f64>(headers, "x-ratelimit-reset-after")
            .or_else(|| {
                let reset_epoch = header_value::<f64>(headers, "x-ratelimit-reset")?;
                let now_epoch = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .ok()?
                    .as_secs_f64();
                Some((reset_epoch - now_epoch).max(0.0))
            })
            .or_else(|| header_value::<f64>(headers, "retry-after"));

        if let Some(secs) = reset_after {
            *bucket.reset_at.lock() = Instant::now() + Duration::from_secs_f64(secs.max(0.0));
        }
    }

    /// Set the global rate limit window after a global 429.
    pub fn set_global(&self, retry_after_ms: u64) {
        *self.global_until.lock() = Some(Instant::now() + Duration::from_millis(retry_after_ms));
    }

    /// Run `op`, retrying transient failures until it succeeds, the retry
    /// budget is spent, or `deadline` would be overrun.
    ///
    /// A 429 honors its `Retry-After` verbatim; statuses in
    /// `retryable_statuses` (and transport failures) back off
    /// exponentially with jitter.
    pub async fn with_retry<T, F, Fut>(
        &self,
        mut op: F,
        max_retries: u32,
        retryable_statuses: &[u16],
        deadline: Instant,
    ) -> Result<T, HttpError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HttpError>>,
    {
        let mut attempt = 0u32;

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let delay = match &err {
                HttpError::RateLimited {
                    retry_after_ms,
                    global,
                } => {
                    if *global {
                        self.set_global(*retry_after_ms);
                    }
                    // Retry-After is honored verbatim, no jitter.
                    Duration::from_millis(*retry_after_ms)
                }
                e if is_retryable(e, retryable_statuses) => backoff_delay(attempt),
                _ => return Err(err),
            };

            if attempt >= max_retries {
                return Err(err);
            }
            if Instant::now() + delay >= deadline {
                return Err(HttpError::DeadlineElapsed);
            }

            attempt += 1;
            warn!(
                attempt,
                delay_ms = delay.as_millis(),
                error = %err,
                "Retrying request"
            );
            sleep(delay).await;
        }
    }

    fn bucket(&self, endpoint: Endpoint) -> Arc<Bucket> {
        self.buckets
            .entry(endpoint.template())
            .or_insert_with(|| {
                Arc::new(Bucket {
                    remaining: Mutex::new(1),
                    reset_at: Mutex::new(Instant::now()),
                    semaphore: Semaphore::new(1),
                })
            })
            .clone()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff for attempt `n`: `0.5s * 2^n` capped at 30s, plus
/// uniform jitter in `[0, 0.25 * delay]`.
pub fn backoff_delay(attempt: u32) -> Duration {
    use rand::Rng;

    let exp = BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(BACKOFF_CAP);
    let jitter_cap = exp.as_millis() as u64 / 4;
    let jitter = rand::rng().random_range(0..=jitter_cap);
    exp + Duration::from_millis(jitter)
}

fn is_retryable(err: &HttpError, retryable_statuses: &[u16]) -> bool {
    err.is_transport()
        || err
            .status()
            .is_some_and(|status| retryable_statuses.contains(&status))
}

fn header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}
