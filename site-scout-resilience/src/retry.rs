//! Adaptive retry with per-class backoff.
//!
//! Every failure is classified before deciding whether and how long to wait:
//!
//! | Class                    | Retried | Delay                                   |
//! |--------------------------|---------|-----------------------------------------|
//! | `timeout` / `unknown`    | yes     | `base * 2^(attempt-1)`, capped, ±jitter |
//! | `server_error`           | yes     | uniform in `[max(prev, 1s), 180s]`      |
//! | `rate_limit`             | yes     | retry-after hint, else uniform 5s..300s |
//! | `permanent_client_error` | never   | -                                       |
//!
//! # Example
//!
//! ```no_run
//! use site_scout_resilience::retry::{RemoteError, RetryConfig, RetryEngine};
//!
//! # async fn example() {
//! let engine = RetryEngine::new(RetryConfig::default());
//!
//! let result = engine
//!     .call_with_retry(6, |attempt| async move {
//!         if attempt < 3 {
//!             Err(RemoteError::http(503))
//!         } else {
//!             Ok("report")
//!         }
//!     })
//!     .await;
//! # }
//! ```

use rand::Rng;
use site_scout_core::ErrorClass;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::outcome::{DegradeReason, Outcome};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts when the caller does not say otherwise
    pub max_attempts: u32,
    /// First exponential delay for timeouts and unknown failures
    pub base_delay: Duration,
    /// Cap for exponential delays
    pub max_delay: Duration,
    /// Relative jitter applied to exponential delays (0.15 = ±15%)
    pub jitter: f64,
    /// Window for server-error delays
    pub server_error_min: Duration,
    pub server_error_max: Duration,
    /// Window for rate-limit delays when no hint was given
    pub rate_limit_min: Duration,
    pub rate_limit_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.15,
            server_error_min: Duration::from_secs(1),
            server_error_max: Duration::from_secs(180),
            rate_limit_min: Duration::from_secs(5),
            rate_limit_max: Duration::from_secs(300),
        }
    }
}

/// Failure of a remote call, before classification.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,

    #[error("request aborted")]
    Aborted,

    #[error("HTTP {status}")]
    Http {
        status: u16,
        body: Option<String>,
        retry_after: Option<Duration>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    pub fn http(status: u16) -> Self {
        RemoteError::Http {
            status,
            body: None,
            retry_after: None,
        }
    }
}

/// Outcome of classifying a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub class: ErrorClass,
    pub retry_after: Option<Duration>,
    pub message: String,
}

/// Errors that can be mapped onto an [`ErrorClass`].
pub trait Classify {
    fn classify(&self) -> ClassifiedError;
}

impl Classify for RemoteError {
    fn classify(&self) -> ClassifiedError {
        let (class, retry_after) = match self {
            RemoteError::Timeout | RemoteError::Aborted => (ErrorClass::Timeout, None),
            RemoteError::Http {
                status,
                body,
                retry_after,
            } => (
                classify_status(*status, body.as_deref()),
                *retry_after,
            ),
            RemoteError::Network(message) if mentions_timeout(message) => {
                (ErrorClass::Timeout, None)
            }
            RemoteError::Network(_) | RemoteError::Other(_) => (ErrorClass::Unknown, None),
        };

        ClassifiedError {
            class,
            retry_after: if class == ErrorClass::RateLimit {
                retry_after
            } else {
                None
            },
            message: self.to_string(),
        }
    }
}

/// Map an HTTP status (and body, for quota wording on 403) to a class.
pub fn classify_status(status: u16, body: Option<&str>) -> ErrorClass {
    match status {
        429 => ErrorClass::RateLimit,
        403 if body.map(mentions_quota).unwrap_or(false) => ErrorClass::RateLimit,
        500..=599 => ErrorClass::ServerError,
        400..=499 => ErrorClass::PermanentClientError,
        _ => ErrorClass::Unknown,
    }
}

const QUOTA_WORDING: &[&str] = &[
    "quota",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
    "exceeded",
];

fn mentions_quota(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    QUOTA_WORDING.iter().any(|word| body.contains(word))
}

fn mentions_timeout(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("timed out") || message.contains("timeout") || message.contains("abort")
}

/// Parse a `Retry-After` header value, either delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Error returned once the retry engine gives up.
#[derive(Debug)]
pub struct RetryError<E> {
    pub error: E,
    pub class: ErrorClass,
    pub attempts: u32,
    /// Delays slept between attempts, in order
    pub delays: Vec<Duration>,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failure after {} attempt(s): {}",
            self.class, self.attempts, self.error
        )
    }
}

impl<E: std::error::Error> std::error::Error for RetryError<E> {}

/// What the failure most likely means, given the class and a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDiagnosis {
    /// The target answers but the dependency measuring it does not
    DependencyDown,
    /// Both answer, the target is just too slow for the budget
    TargetSlow,
    /// The target itself did not answer the probe
    TargetUnreachable,
    /// The dependency refused the request outright
    Rejected,
}

impl FailureDiagnosis {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureDiagnosis::DependencyDown => "dependency_down",
            FailureDiagnosis::TargetSlow => "target_slow",
            FailureDiagnosis::TargetUnreachable => "target_unreachable",
            FailureDiagnosis::Rejected => "rejected",
        }
    }
}

impl fmt::Display for FailureDiagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combine the error class with the probe result (`None` when no probe ran).
pub fn diagnose(class: ErrorClass, target_alive: Option<bool>) -> FailureDiagnosis {
    match (class, target_alive) {
        (ErrorClass::PermanentClientError, _) => FailureDiagnosis::Rejected,
        (_, Some(false)) => FailureDiagnosis::TargetUnreachable,
        (ErrorClass::Timeout, _) => FailureDiagnosis::TargetSlow,
        _ => FailureDiagnosis::DependencyDown,
    }
}

pub struct RetryEngine {
    config: RetryConfig,
}

impl RetryEngine {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before attempt `attempt + 1`, after attempt `attempt` failed.
    pub fn next_delay(
        &self,
        class: ErrorClass,
        attempt: u32,
        retry_after: Option<Duration>,
        previous: Option<Duration>,
    ) -> Duration {
        let mut rng = rand::thread_rng();

        match class {
            ErrorClass::ServerError => {
                let floor = previous
                    .unwrap_or(self.config.server_error_min)
                    .max(self.config.server_error_min)
                    .min(self.config.server_error_max);
                uniform(&mut rng, floor, self.config.server_error_max)
            }
            ErrorClass::RateLimit => retry_after.unwrap_or_else(|| {
                uniform(
                    &mut rng,
                    self.config.rate_limit_min,
                    self.config.rate_limit_max,
                )
            }),
            ErrorClass::Timeout | ErrorClass::Unknown => {
                let exponent = attempt.saturating_sub(1).min(31);
                let delay = self
                    .config
                    .base_delay
                    .saturating_mul(1u32 << exponent)
                    .min(self.config.max_delay);

                if self.config.jitter > 0.0 {
                    let factor =
                        rng.gen_range((1.0 - self.config.jitter)..=(1.0 + self.config.jitter));
                    delay.mul_f64(factor)
                } else {
                    delay
                }
            }
            ErrorClass::PermanentClientError => Duration::ZERO,
        }
    }

    /// Call `operation` until it succeeds, fails permanently, or runs out of
    /// attempts. The closure receives the 1-based attempt number.
    pub async fn call_with_retry<T, E, F, Fut>(
        &self,
        max_attempts: u32,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        self.retry_loop(max_attempts, None, operation).await
    }

    /// Like [`call_with_retry`](Self::call_with_retry), but gives up with the
    /// last classified failure as soon as the next delay would end at or past
    /// `deadline`, instead of sleeping into a budget that cannot be met.
    pub async fn call_with_retry_until<T, E, F, Fut>(
        &self,
        max_attempts: u32,
        deadline: Instant,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        self.retry_loop(max_attempts, Some(deadline), operation)
            .await
    }

    async fn retry_loop<T, E, F, Fut>(
        &self,
        max_attempts: u32,
        deadline: Option<Instant>,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let max_attempts = max_attempts.max(1);
        let mut delays = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let classified = error.classify();

                    if !classified.class.is_retryable() || attempt >= max_attempts {
                        warn!(
                            attempts = attempt,
                            class = %classified.class,
                            error = %classified.message,
                            "Giving up on operation"
                        );
                        return Err(RetryError {
                            error,
                            class: classified.class,
                            attempts: attempt,
                            delays,
                        });
                    }

                    let delay = self.next_delay(
                        classified.class,
                        attempt,
                        classified.retry_after,
                        delays.last().copied(),
                    );

                    if deadline.map_or(false, |d| Instant::now() + delay >= d) {
                        warn!(
                            attempts = attempt,
                            class = %classified.class,
                            delay_ms = delay.as_millis() as u64,
                            error = %classified.message,
                            "Next retry would overrun the budget, giving up"
                        );
                        return Err(RetryError {
                            error,
                            class: classified.class,
                            attempts: attempt,
                            delays,
                        });
                    }

                    warn!(
                        attempt,
                        max_attempts,
                        class = %classified.class,
                        delay_ms = delay.as_millis() as u64,
                        error = %classified.message,
                        "Operation failed, retrying"
                    );
                    delays.push(delay);
                    sleep(delay).await;
                }
            }
        }
    }

    /// Retry, then turn an exhausted failure into a fallback value.
    ///
    /// When the retries give up, `probe` (a cheap liveness check of the
    /// target) runs and the resulting [`FailureDiagnosis`] is handed to
    /// `fallback`. A fallback returning `None` makes the outcome `Fatal`.
    pub async fn call_with_fallback<T, E, F, Fut, P, Fb>(
        &self,
        max_attempts: u32,
        operation: F,
        probe: Option<P>,
        fallback: Fb,
    ) -> Outcome<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
        P: Future<Output = bool>,
        Fb: FnOnce(FailureDiagnosis, &RetryError<E>) -> Option<T>,
    {
        let error = match self.call_with_retry(max_attempts, operation).await {
            Ok(value) => return Outcome::Success(value),
            Err(error) => error,
        };

        let target_alive = match probe {
            Some(probe) => Some(probe.await),
            None => None,
        };
        let diagnosis = diagnose(error.class, target_alive);
        debug!(diagnosis = %diagnosis, class = %error.class, "Retries exhausted");

        match fallback(diagnosis, &error) {
            Some(value) => Outcome::Degraded {
                value,
                reason: DegradeReason::RetriesExhausted {
                    attempts: error.attempts,
                    error: error.error.to_string(),
                },
            },
            None => Outcome::Fatal(error),
        }
    }
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

fn uniform(rng: &mut impl Rng, low: Duration, high: Duration) -> Duration {
    let low_ms = low.as_millis() as u64;
    let high_ms = high.as_millis() as u64;
    if high_ms <= low_ms {
        return low;
    }
    Duration::from_millis(rng.gen_range(low_ms..=high_ms))
}
