//! Circuit breaker keyed by dependency name.
//!
//! Each named dependency gets its own [`DependencyState`]. After
//! `failure_threshold` failures inside `monitoring_window` the circuit opens and
//! calls are answered by the fallback (or rejected) without touching the
//! dependency. Once `recovery_timeout` has elapsed since the last attempt, the
//! next caller is let through as a single trial: success closes the circuit,
//! failure restarts the cooldown. No second trial starts while one is still
//! running, however long it takes.
//!
//! # Example
//!
//! ```no_run
//! use site_scout_resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
//!
//! let outcome = breaker
//!     .execute(
//!         "performance_api",
//!         || async { Err::<u32, _>("503 Service Unavailable") },
//!         Some(|| 0),
//!     )
//!     .await;
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::outcome::{DegradeReason, Outcome};

/// Derived view of a dependency's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Too many failures, calls are short-circuited
    Open,
    /// Cooldown elapsed, the next call is a trial
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures inside the monitoring window before the circuit opens
    pub failure_threshold: u32,
    /// Cooldown after the last attempt before a trial call is allowed
    pub recovery_timeout: Duration,
    /// A failure older than this no longer counts towards the threshold
    pub monitoring_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            monitoring_window: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_monitoring_window(mut self, window: Duration) -> Self {
        self.monitoring_window = window;
        self
    }
}

/// Circuit breaker errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open and no fallback was supplied
    #[error("Dependency {name} is unavailable (circuit open)")]
    Unavailable { name: String },

    /// Execution failed with underlying error
    #[error("Execution failed: {0}")]
    ExecutionFailed(E),
}

/// Per-dependency failure bookkeeping.
///
/// Only the breaker mutates it; [`CircuitBreaker::dependency_state`] hands out
/// copies.
#[derive(Debug, Clone, Default)]
pub struct DependencyState {
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
    pub open: bool,
    pub last_attempt_time: Option<Instant>,
    trial: Option<Weak<()>>,
}

impl DependencyState {
    /// A half-open trial was admitted and its caller has not settled or
    /// dropped it yet.
    pub fn trial_in_flight(&self) -> bool {
        self.trial
            .as_ref()
            .map(|trial| trial.strong_count() > 0)
            .unwrap_or(false)
    }

    fn cooldown_elapsed(&self, recovery_timeout: Duration) -> bool {
        self.last_attempt_time
            .map(|t| t.elapsed() >= recovery_timeout)
            .unwrap_or(true)
    }
}

/// Held by the caller running a half-open trial. Dropping it, settled or
/// cancelled, ends the trial.
#[derive(Debug)]
struct TrialTicket {
    _held: Arc<()>,
}

#[derive(Debug)]
enum Admission {
    Closed,
    Trial(TrialTicket),
    Rejected,
}

impl Admission {
    fn is_trial(&self) -> bool {
        matches!(self, Admission::Trial(_))
    }
}

/// Metrics for circuit breaker
#[derive(Debug, Default)]
struct CircuitBreakerMetrics {
    failures: AtomicU64,
    successes: AtomicU64,
    opened_count: AtomicU64,
    closed_count: AtomicU64,
    rejected_count: AtomicU64,
}

/// Circuit breaker statistics across all dependencies
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub failures: u64,
    pub successes: u64,
    pub opened_count: u64,
    pub closed_count: u64,
    pub rejected_count: u64,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    states: RwLock<HashMap<String, DependencyState>>,
    metrics: CircuitBreakerMetrics,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            states: RwLock::new(HashMap::new()),
            metrics: CircuitBreakerMetrics::default(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Copy of the named dependency's state, if it has ever been called.
    pub async fn dependency_state(&self, name: &str) -> Option<DependencyState> {
        self.states.read().await.get(name).cloned()
    }

    pub async fn state(&self, name: &str) -> CircuitState {
        match self.states.read().await.get(name) {
            Some(s)
                if s.open
                    && !s.trial_in_flight()
                    && s.cooldown_elapsed(self.config.recovery_timeout) =>
            {
                CircuitState::HalfOpen
            }
            Some(s) if s.open => CircuitState::Open,
            _ => CircuitState::Closed,
        }
    }

    pub fn metrics(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            failures: self.metrics.failures.load(Ordering::Relaxed),
            successes: self.metrics.successes.load(Ordering::Relaxed),
            opened_count: self.metrics.opened_count.load(Ordering::Relaxed),
            closed_count: self.metrics.closed_count.load(Ordering::Relaxed),
            rejected_count: self.metrics.rejected_count.load(Ordering::Relaxed),
        }
    }

    /// Run `primary` under the named dependency's circuit.
    ///
    /// When the circuit is open the primary is skipped and `fallback` answers
    /// instead; without a fallback the call fails with
    /// [`CircuitBreakerError::Unavailable`]. A primary failure is returned as
    /// `Fatal` unless it trips the circuit and a fallback exists.
    pub async fn execute<T, E, F, Fut, Fb>(
        &self,
        name: &str,
        primary: F,
        fallback: Option<Fb>,
    ) -> Outcome<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Fb: FnOnce() -> T,
        E: fmt::Display,
    {
        let admission = self.admit(name).await;

        if matches!(admission, Admission::Rejected) {
            self.metrics.rejected_count.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("circuit_breaker_rejected", "dependency" => name.to_string())
                .increment(1);

            return match fallback {
                Some(fb) => {
                    debug!(dependency = %name, "Circuit open, serving fallback");
                    Outcome::Degraded {
                        value: fb(),
                        reason: DegradeReason::CircuitOpen {
                            dependency: name.to_string(),
                        },
                    }
                }
                None => Outcome::Fatal(CircuitBreakerError::Unavailable {
                    name: name.to_string(),
                }),
            };
        }

        match primary().await {
            Ok(value) => {
                self.on_success(name, &admission).await;
                Outcome::Success(value)
            }
            Err(e) => {
                let now_open = self.on_failure(name, &admission).await;
                match fallback {
                    Some(fb) if now_open => Outcome::Degraded {
                        value: fb(),
                        reason: DegradeReason::CircuitTripped {
                            dependency: name.to_string(),
                            error: e.to_string(),
                        },
                    },
                    _ => Outcome::Fatal(CircuitBreakerError::ExecutionFailed(e)),
                }
            }
        }
    }

    /// Run without a fallback.
    pub async fn call<T, E, F, Fut>(
        &self,
        name: &str,
        primary: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.execute(name, primary, None::<fn() -> T>)
            .await
            .into_result()
    }

    async fn admit(&self, name: &str) -> Admission {
        let mut states = self.states.write().await;
        let state = states.entry(name.to_string()).or_default();

        if !state.open {
            return Admission::Closed;
        }

        if state.trial_in_flight() {
            return Admission::Rejected;
        }

        if state.cooldown_elapsed(self.config.recovery_timeout) {
            let ticket = Arc::new(());
            state.trial = Some(Arc::downgrade(&ticket));
            state.last_attempt_time = Some(Instant::now());
            info!(dependency = %name, "Circuit half-open, allowing trial call");
            Admission::Trial(TrialTicket { _held: ticket })
        } else {
            Admission::Rejected
        }
    }

    async fn on_success(&self, name: &str, admission: &Admission) {
        let mut states = self.states.write().await;
        let state = states.entry(name.to_string()).or_default();
        self.metrics.successes.fetch_add(1, Ordering::Relaxed);
        if admission.is_trial() {
            state.trial = None;
        }

        if state.open {
            info!(dependency = %name, "Circuit closing after successful trial");
            self.metrics.closed_count.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("circuit_breaker_closed", "dependency" => name.to_string())
                .increment(1);
        }

        state.failure_count = 0;
        state.open = false;
    }

    /// Returns whether the circuit is open after recording the failure.
    async fn on_failure(&self, name: &str, admission: &Admission) -> bool {
        let mut states = self.states.write().await;
        let state = states.entry(name.to_string()).or_default();
        self.metrics.failures.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        if let Some(last) = state.last_failure_time {
            if now.duration_since(last) > self.config.monitoring_window {
                state.failure_count = 0;
            }
        }
        state.failure_count += 1;
        state.last_failure_time = Some(now);

        if admission.is_trial() {
            warn!(dependency = %name, "Trial call failed, circuit stays open");
            state.trial = None;
            state.open = true;
            state.last_attempt_time = Some(now);
        } else if !state.open && state.failure_count >= self.config.failure_threshold {
            warn!(
                dependency = %name,
                failures = state.failure_count,
                "Circuit opening"
            );
            state.open = true;
            state.last_attempt_time = Some(now);
            self.metrics.opened_count.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("circuit_breaker_opened", "dependency" => name.to_string())
                .increment(1);
        }

        state.open
    }

    /// Clear one dependency's state, or every state when `name` is `None`.
    pub async fn reset(&self, name: Option<&str>) {
        let mut states = self.states.write().await;
        match name {
            Some(name) => {
                info!(dependency = %name, "Manually resetting circuit breaker");
                states.remove(name);
            }
            None => {
                info!("Manually resetting all circuit breakers");
                states.clear();
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
