//! Warn-then-cancel deadlines with adaptive budgets.
//!
//! Every supervised operation gets two single-shot timers: a warning at
//! `warn_ratio * budget` and a forced timeout at `budget`. Both are tied to a
//! [`CancellationToken`] that the operation receives, so a forced timeout or
//! an abort requested by the warning hook cancels only that operation.
//!
//! Budgets adapt per operation name: once enough successful durations have
//! been recorded, the budget becomes `min(headroom * p95, max_multiplier *
//! static)`. Timed-out and failed runs are never recorded.
//!
//! # Example
//!
//! ```no_run
//! use site_scout_core::RunId;
//! use site_scout_resilience::timeout::{TimeoutConfig, TimeoutSupervisor};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let supervisor = TimeoutSupervisor::new(
//!     TimeoutConfig::new(Duration::from_secs(30))
//!         .with_operation("full_page_screenshot", Duration::from_secs(45)),
//! );
//!
//! let result = supervisor
//!     .supervise(RunId::new(), "raw_fetch", None, |cancel| async move {
//!         tokio::select! {
//!             _ = cancel.cancelled() => Err("cancelled"),
//!             _ = tokio::time::sleep(Duration::from_secs(1)) => Ok(42),
//!         }
//!     })
//!     .await;
//! # }
//! ```

use dashmap::DashMap;
use site_scout_core::RunId;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timeout configuration
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Default timeout for all operations
    pub default: Duration,
    /// Operation-specific timeouts
    pub operation_specific: HashMap<String, Duration>,
    /// Fraction of the budget at which the warning fires
    pub warn_ratio: f64,
    /// Successful durations kept per operation
    pub history_size: usize,
    /// Samples required before the budget adapts
    pub min_samples: usize,
    /// Multiplier applied to the p95 of the history
    pub headroom: f64,
    /// Adapted budgets never exceed this multiple of the static budget
    pub max_multiplier: f64,
    /// Lower bound for any budget
    pub floor: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl TimeoutConfig {
    /// Create a new timeout config with default timeout
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            operation_specific: HashMap::new(),
            warn_ratio: 0.8,
            history_size: 20,
            min_samples: 5,
            headroom: 1.5,
            max_multiplier: 2.0,
            floor: Duration::from_millis(100),
        }
    }

    /// Add an operation-specific timeout
    pub fn with_operation(mut self, operation: impl Into<String>, timeout: Duration) -> Self {
        self.operation_specific.insert(operation.into(), timeout);
        self
    }

    /// Static timeout for a specific operation
    pub fn get_timeout(&self, operation: &str) -> Duration {
        self.operation_specific
            .get(operation)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Timeout errors
#[derive(Debug, Clone, Error)]
pub enum TimeoutError<E> {
    /// Operation ran past its budget
    #[error("Operation {operation} timed out after {budget:?}")]
    Elapsed { operation: String, budget: Duration },

    /// The warning hook asked for the operation to stop
    #[error("Operation {operation} aborted at warning")]
    Aborted { operation: String },

    /// The whole run was cancelled
    #[error("Operation {operation} cancelled")]
    Cancelled { operation: String },

    /// Inner operation failed
    #[error("Operation failed: {0}")]
    Inner(E),
}

/// Answer of the warning hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningDecision {
    Continue,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TimeoutState {
    Running = 0,
    Completed = 1,
    Aborted = 2,
    TimedOut = 3,
}

impl TimeoutState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TimeoutState::Completed,
            2 => TimeoutState::Aborted,
            3 => TimeoutState::TimedOut,
            _ => TimeoutState::Running,
        }
    }
}

type WarningHook = Box<dyn FnOnce(Duration) -> WarningDecision + Send>;
type ForceTimeoutHook = Box<dyn FnOnce() + Send>;

/// Optional callbacks fired by the timers.
#[derive(Default)]
pub struct TimeoutHooks {
    on_warning: Option<WarningHook>,
    on_force_timeout: Option<ForceTimeoutHook>,
}

impl TimeoutHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the elapsed time when the warning timer fires.
    pub fn on_warning<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(Duration) -> WarningDecision + Send + 'static,
    {
        self.on_warning = Some(Box::new(hook));
        self
    }

    /// Cleanup run when the operation is forced to stop.
    pub fn on_force_timeout<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_force_timeout = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for TimeoutHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutHooks")
            .field("on_warning", &self.on_warning.is_some())
            .field("on_force_timeout", &self.on_force_timeout.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct Settlement {
    state: AtomicU8,
    active: Arc<AtomicUsize>,
}

impl Settlement {
    /// First caller wins; later settles are ignored.
    fn settle(&self, to: TimeoutState) -> bool {
        let won = self
            .state
            .compare_exchange(
                TimeoutState::Running as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            self.active.fetch_sub(1, Ordering::Relaxed);
        }
        won
    }

    fn state(&self) -> TimeoutState {
        TimeoutState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Handle to one supervised operation.
#[derive(Debug, Clone)]
pub struct TimeoutHandle {
    run_id: RunId,
    operation: String,
    budget: Duration,
    started: Instant,
    token: CancellationToken,
    settlement: Arc<Settlement>,
}

impl TimeoutHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Token the operation should watch; cancelled on timeout or abort.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn state(&self) -> TimeoutState {
        self.settlement.state()
    }
}

pub struct TimeoutSupervisor {
    config: TimeoutConfig,
    history: RwLock<HashMap<String, VecDeque<Duration>>>,
    runs: DashMap<RunId, CancellationToken>,
    active: Arc<AtomicUsize>,
}

impl TimeoutSupervisor {
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            config,
            history: RwLock::new(HashMap::new()),
            runs: DashMap::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Budget the next run of `operation` would get.
    pub async fn budget_for(&self, operation: &str) -> Duration {
        let static_budget = self.config.get_timeout(operation);
        let history = self.history.read().await;

        let budget = match history.get(operation) {
            Some(samples) if samples.len() >= self.config.min_samples => {
                let adapted = p95(samples).mul_f64(self.config.headroom);
                adapted.min(static_budget.mul_f64(self.config.max_multiplier))
            }
            _ => static_budget,
        };

        budget.max(self.config.floor)
    }

    /// Arm the warning and force-timeout timers for one operation.
    ///
    /// `budget` overrides the adaptive budget when given.
    pub async fn start_timeout(
        &self,
        run_id: RunId,
        operation: &str,
        budget: Option<Duration>,
        hooks: TimeoutHooks,
    ) -> TimeoutHandle {
        let budget = match budget {
            Some(budget) => budget.max(self.config.floor),
            None => self.budget_for(operation).await,
        };

        let token = self
            .runs
            .entry(run_id)
            .or_insert_with(CancellationToken::new)
            .child_token();

        self.active.fetch_add(1, Ordering::Relaxed);
        let handle = TimeoutHandle {
            run_id,
            operation: operation.to_string(),
            budget,
            started: Instant::now(),
            token,
            settlement: Arc::new(Settlement {
                state: AtomicU8::new(TimeoutState::Running as u8),
                active: self.active.clone(),
            }),
        };

        debug!(
            run_id = %run_id,
            operation = %operation,
            budget_ms = budget.as_millis() as u64,
            "Timeout armed"
        );

        tokio::spawn(run_timers(
            handle.clone(),
            budget.mul_f64(self.config.warn_ratio),
            hooks,
        ));

        handle
    }

    /// Settle a handle as completed. Returns `false` if a timer settled it
    /// first. Only successful completions feed the adaptive history.
    pub async fn complete(&self, handle: &TimeoutHandle, duration: Duration, succeeded: bool) -> bool {
        if !handle.settlement.settle(TimeoutState::Completed) {
            debug!(
                operation = %handle.operation,
                state = ?handle.state(),
                "Completion ignored, already settled"
            );
            return false;
        }
        handle.token.cancel();

        if succeeded {
            let mut history = self.history.write().await;
            let samples = history.entry(handle.operation.clone()).or_default();
            samples.push_back(duration);
            while samples.len() > self.config.history_size {
                samples.pop_front();
            }
        }
        true
    }

    /// Run `operation` under a supervised deadline with no hooks.
    pub async fn supervise<T, E, F, Fut>(
        &self,
        run_id: RunId,
        operation: &str,
        budget: Option<Duration>,
        f: F,
    ) -> Result<T, TimeoutError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.supervise_with_hooks(run_id, operation, budget, TimeoutHooks::default(), f)
            .await
    }

    /// Run `operation` under a supervised deadline.
    ///
    /// The operation future is dropped as soon as its token is cancelled.
    pub async fn supervise_with_hooks<T, E, F, Fut>(
        &self,
        run_id: RunId,
        operation: &str,
        budget: Option<Duration>,
        hooks: TimeoutHooks,
        f: F,
    ) -> Result<T, TimeoutError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let handle = self.start_timeout(run_id, operation, budget, hooks).await;
        let token = handle.token();

        tokio::select! {
            biased;

            result = f(token.clone()) => {
                self.complete(&handle, handle.elapsed(), result.is_ok()).await;
                result.map_err(TimeoutError::Inner)
            }
            _ = token.cancelled() => {
                // A cancelled run leaves the handle running until settled here.
                handle.settlement.settle(TimeoutState::Aborted);
                match handle.state() {
                    TimeoutState::TimedOut => Err(TimeoutError::Elapsed {
                        operation: operation.to_string(),
                        budget: handle.budget,
                    }),
                    TimeoutState::Aborted if !self.is_run_cancelled(&run_id) => {
                        Err(TimeoutError::Aborted {
                            operation: operation.to_string(),
                        })
                    }
                    _ => Err(TimeoutError::Cancelled {
                        operation: operation.to_string(),
                    }),
                }
            }
        }
    }

    /// Cancel every supervised operation of a run.
    pub fn cancel_run(&self, run_id: &RunId) {
        if let Some(token) = self.runs.get(run_id) {
            info!(run_id = %run_id, "Cancelling all operations of run");
            token.cancel();
        }
    }

    fn is_run_cancelled(&self, run_id: &RunId) -> bool {
        self.runs
            .get(run_id)
            .map(|token| token.is_cancelled())
            .unwrap_or(false)
    }

    /// Drop the run's cancellation scope once the run is over.
    pub fn finish_run(&self, run_id: &RunId) {
        self.runs.remove(run_id);
    }

    /// Operations armed but not yet settled.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub async fn history_len(&self, operation: &str) -> usize {
        self.history
            .read()
            .await
            .get(operation)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

impl Default for TimeoutSupervisor {
    fn default() -> Self {
        Self::new(TimeoutConfig::default())
    }
}

async fn run_timers(handle: TimeoutHandle, warn_after: Duration, hooks: TimeoutHooks) {
    let TimeoutHooks {
        on_warning,
        on_force_timeout,
    } = hooks;

    tokio::select! {
        _ = handle.token.cancelled() => {
            handle.settlement.settle(TimeoutState::Aborted);
            return;
        }
        _ = sleep(warn_after) => {}
    }

    if handle.state() != TimeoutState::Running {
        return;
    }

    warn!(
        run_id = %handle.run_id,
        operation = %handle.operation,
        elapsed_ms = handle.elapsed().as_millis() as u64,
        budget_ms = handle.budget.as_millis() as u64,
        "Operation approaching timeout"
    );

    if let Some(on_warning) = on_warning {
        if on_warning(handle.elapsed()) == WarningDecision::Abort
            && handle.settlement.settle(TimeoutState::Aborted)
        {
            warn!(operation = %handle.operation, "Operation aborted at warning");
            if let Some(cleanup) = on_force_timeout {
                cleanup();
            }
            handle.token.cancel();
            return;
        }
    }

    tokio::select! {
        _ = handle.token.cancelled() => {
            handle.settlement.settle(TimeoutState::Aborted);
            return;
        }
        _ = sleep(handle.budget.saturating_sub(warn_after)) => {}
    }

    if handle.settlement.settle(TimeoutState::TimedOut) {
        warn!(
            run_id = %handle.run_id,
            operation = %handle.operation,
            budget_ms = handle.budget.as_millis() as u64,
            "Operation timed out"
        );
        if let Some(cleanup) = on_force_timeout {
            cleanup();
        }
        handle.token.cancel();
    }
}

fn p95(samples: &VecDeque<Duration>) -> Duration {
    let mut sorted: Vec<Duration> = samples.iter().copied().collect();
    sorted.sort();
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Apply a plain timeout to an async operation
pub async fn with_timeout<F, T, E>(duration: Duration, future: F) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(TimeoutError::Inner(e)),
        Err(_) => Err(TimeoutError::Elapsed {
            operation: "anonymous".to_string(),
            budget: duration,
        }),
    }
}
