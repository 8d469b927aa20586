//! Parallel Data Collector.
//!
//! Every enabled source runs as its own task behind the same stack of
//! guards:
//!
//! ```text
//! shutdown guard -> bulkhead (heavyweight only)
//!   -> circuit breaker (fallback: source placeholder)
//!     -> throttle lane -> timeout supervisor -> retry engine -> source
//! ```
//!
//! A failing source settles as a failed or degraded outcome and never cancels
//! its siblings. Only the hard ceiling and bulkhead exhaustion fail a call.

use futures::future::join_all;
use site_scout_core::{
    CollectionOutcome, CollectorConfig, CombinedResult, CoreError, ErrorClass, Result, RunId,
    SourceFailure, SourcePayload,
};
use site_scout_resilience::{
    diagnose, CircuitBreakerError, Classify, ClassifiedError, DegradeReason, Outcome, RetryError,
    TimeoutError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::context::ResilienceContext;
use crate::sources::{parse_target, CollectionSource, SourceContext, SourceError};
use crate::synthesis::synthesize;

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Wall-clock limit for one `collect_all` call, independent of the
    /// per-operation budgets.
    pub hard_ceiling: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            hard_ceiling: Duration::from_secs(60),
        }
    }
}

impl CollectorSettings {
    pub fn with_hard_ceiling(mut self, ceiling: Duration) -> Self {
        self.hard_ceiling = ceiling;
        self
    }
}

pub struct ParallelDataCollector {
    resilience: Arc<ResilienceContext>,
    sources: Vec<Arc<dyn CollectionSource>>,
    settings: CollectorSettings,
}

impl ParallelDataCollector {
    pub fn new(resilience: Arc<ResilienceContext>) -> Self {
        Self {
            resilience,
            sources: Vec::new(),
            settings: CollectorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: CollectorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn CollectionSource>) -> Self {
        self.register(source);
        self
    }

    pub fn register(&mut self, source: Arc<dyn CollectionSource>) {
        debug!(source = %source.name(), "Registered collection source");
        self.sources.push(source);
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    pub fn resilience(&self) -> &Arc<ResilienceContext> {
        &self.resilience
    }

    /// Collect everything about `target` under a fresh run id.
    pub async fn collect_all(
        &self,
        target: &str,
        config: &CollectorConfig,
    ) -> Result<CombinedResult> {
        self.collect_for_run(RunId::new(), target, config).await
    }

    /// Launch every enabled source concurrently, wait for all of them to
    /// settle and fold the outcomes into one result.
    pub async fn collect_for_run(
        &self,
        run_id: RunId,
        target: &str,
        config: &CollectorConfig,
    ) -> Result<CombinedResult> {
        config.validate()?;
        let target = parse_target(target)?;

        let sources: Vec<Arc<dyn CollectionSource>> = self
            .sources
            .iter()
            .filter(|s| s.enabled(config))
            .cloned()
            .collect();

        info!(
            run_id = %run_id,
            target = %target,
            sources = sources.len(),
            "Starting collection"
        );

        let started = Instant::now();
        let ctx = SourceContext::new(run_id, target.clone(), config.clone());

        let mut handles = Vec::with_capacity(sources.len());
        for source in &sources {
            let source = source.clone();
            let resilience = self.resilience.clone();
            let ctx = ctx.clone();

            handles.push(tokio::spawn(async move {
                run_source(resilience, source, ctx).await
            }));
        }
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let settled = match timeout(self.settings.hard_ceiling, join_all(handles)).await {
            Ok(settled) => settled,
            Err(_) => {
                warn!(
                    run_id = %run_id,
                    ceiling_ms = self.settings.hard_ceiling.as_millis() as u64,
                    "Collection breached its hard ceiling, cancelling run"
                );
                self.resilience.timeouts.cancel_run(&run_id);
                for abort in &aborts {
                    abort.abort();
                }
                self.resilience.timeouts.finish_run(&run_id);
                return Err(CoreError::DeadlineExceeded(self.settings.hard_ceiling));
            }
        };
        self.resilience.timeouts.finish_run(&run_id);

        let mut outcomes = Vec::with_capacity(settled.len());
        for (source, joined) in sources.iter().zip(settled) {
            match joined {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => return Err(e),
                Err(e) => outcomes.push(CollectionOutcome::failure(
                    source.name(),
                    source.kind(),
                    SourceFailure::new(ErrorClass::Unknown, format!("task panicked: {}", e), 0),
                    0,
                )),
            }
        }

        let result = synthesize(run_id, &target, outcomes, started.elapsed());

        info!(
            run_id = %run_id,
            data_quality = ?result.data_quality,
            succeeded = result.succeeded_sources(),
            total_ms = result.timing.total_ms,
            "Collection finished"
        );

        Ok(result)
    }
}

/// How one source ended, before timing is attached.
enum Settled {
    Success(SourcePayload),
    Degraded(SourcePayload, SourceFailure),
    Failed(SourceFailure),
}

async fn run_source(
    resilience: Arc<ResilienceContext>,
    source: Arc<dyn CollectionSource>,
    ctx: SourceContext,
) -> Result<CollectionOutcome> {
    let started = Instant::now();
    let name = source.name().to_string();
    let kind = source.kind();

    let Some(guard) = resilience.shutdown.track() else {
        warn!(source = %name, "Shutdown in progress, source not started");
        return Ok(CollectionOutcome::failure(
            name,
            kind,
            SourceFailure::new(ErrorClass::Unknown, "shutdown in progress", 0),
            0,
        ));
    };
    let force = guard.force_token();

    let _permit = if source.is_heavyweight() {
        let permit = resilience
            .bulkhead
            .acquire()
            .await
            .map_err(|e| CoreError::ResourceExhausted(e.to_string()))?;
        Some(permit)
    } else {
        None
    };

    let settled = tokio::select! {
        biased;

        // Dropping the work releases any browser session it still holds.
        _ = force.cancelled() => Settled::Failed(SourceFailure::new(
            ErrorClass::Timeout,
            "force-closed during shutdown",
            0,
        )),
        settled = guarded(&resilience, source.as_ref(), &ctx) => settled,
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    let outcome = match settled {
        Settled::Success(payload) => CollectionOutcome::success(name, kind, payload, duration_ms),
        Settled::Degraded(payload, failure) => {
            CollectionOutcome::degraded(name, kind, payload, Some(failure), duration_ms)
        }
        Settled::Failed(failure) => CollectionOutcome::failure(name, kind, failure, duration_ms),
    };

    drop(guard);
    Ok(outcome)
}

async fn guarded(
    resilience: &ResilienceContext,
    source: &dyn CollectionSource,
    ctx: &SourceContext,
) -> Settled {
    let name = source.name();
    let attempts = AtomicU32::new(0);
    let attempts = &attempts;
    let last_error: Mutex<Option<ClassifiedError>> = Mutex::new(None);
    let last_error = &last_error;
    let mut last_failure: Option<SourceFailure> = None;
    let slot = &mut last_failure;

    let outcome = resilience
        .breaker
        .execute(
            name,
            move || async move {
                let result = resilience
                    .throttler
                    .throttle(name, || async move {
                        let budget = resilience.timeouts.budget_for(name).await;
                        resilience
                            .timeouts
                            .supervise(ctx.run_id, name, Some(budget), |token| {
                                let op_ctx = ctx.with_cancel(token);
                                // Retries never sleep past the budget.
                                let deadline = Instant::now() + budget;
                                async move {
                                    resilience
                                        .retry
                                        .call_with_retry_until(
                                            source.max_attempts(),
                                            deadline,
                                            |_| {
                                                attempts.fetch_add(1, Ordering::Relaxed);
                                                let op_ctx = &op_ctx;
                                                async move {
                                                    let result = source.collect(op_ctx).await;
                                                    if let Err(e) = &result {
                                                        record(last_error, e.classify());
                                                    }
                                                    result
                                                }
                                            },
                                        )
                                        .await
                                }
                            })
                            .await
                    })
                    .await;

                result.map_err(|e| {
                    let last = last_error.lock().ok().and_then(|mut last| last.take());
                    let failure = to_failure(e, attempts.load(Ordering::Relaxed), last);
                    *slot = Some(failure.clone());
                    failure
                })
            },
            Some(|| source.fallback(&ctx.target)),
        )
        .await;

    let attempts = attempts.load(Ordering::Relaxed);
    match outcome {
        Outcome::Success(payload) => Settled::Success(payload),
        Outcome::Degraded { value, reason } => {
            let failure = match reason {
                DegradeReason::CircuitOpen { .. } => {
                    SourceFailure::new(ErrorClass::Unknown, reason.to_string(), 0)
                }
                _ => last_failure.unwrap_or_else(|| {
                    SourceFailure::new(ErrorClass::Unknown, reason.to_string(), attempts)
                }),
            };
            recover(source, ctx, failure, Some(value)).await
        }
        Outcome::Fatal(CircuitBreakerError::ExecutionFailed(failure)) => {
            recover(source, ctx, failure, None).await
        }
        Outcome::Fatal(CircuitBreakerError::Unavailable { name }) => {
            let failure =
                SourceFailure::new(ErrorClass::Unknown, format!("circuit open for {}", name), 0);
            recover(source, ctx, failure, None).await
        }
    }
}

/// Log the failure once, then let the source offer a degraded payload based
/// on the diagnosis. The circuit fallback is the last resort.
async fn recover(
    source: &dyn CollectionSource,
    ctx: &SourceContext,
    failure: SourceFailure,
    fallback: Option<SourcePayload>,
) -> Settled {
    let alive = source.probe(ctx).await;
    let diagnosis = diagnose(failure.class, alive);

    warn!(
        run_id = %ctx.run_id,
        source = %source.name(),
        class = %failure.class,
        attempts = failure.attempts,
        diagnosis = %diagnosis,
        error = %failure.message,
        "Source failed"
    );

    match source.degraded(diagnosis, &failure).or(fallback) {
        Some(payload) => Settled::Degraded(payload, failure),
        None => Settled::Failed(failure),
    }
}

fn record(slot: &Mutex<Option<ClassifiedError>>, error: ClassifiedError) {
    if let Ok(mut slot) = slot.lock() {
        *slot = Some(error);
    }
}

/// An elapsed budget keeps the class of the last failed attempt, so a
/// dependency that kept answering 5xx is not mistaken for a slow target.
fn to_failure(
    error: TimeoutError<RetryError<SourceError>>,
    attempts: u32,
    last: Option<ClassifiedError>,
) -> SourceFailure {
    match (error, last) {
        (TimeoutError::Inner(retry), _) => {
            SourceFailure::new(retry.class, retry.error.to_string(), retry.attempts)
        }
        (elapsed @ TimeoutError::Elapsed { .. }, Some(last)) => SourceFailure::new(
            last.class,
            format!("{}, last error: {}", elapsed, last.message),
            attempts,
        ),
        (other, _) => SourceFailure::new(ErrorClass::Timeout, other.to_string(), attempts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use site_scout_resilience::RemoteError;

    #[test]
    fn test_to_failure_keeps_retry_classification() {
        let error = TimeoutError::Inner(RetryError {
            error: SourceError::Remote(RemoteError::http(404)),
            class: ErrorClass::PermanentClientError,
            attempts: 1,
            delays: Vec::new(),
        });

        let failure = to_failure(error, 1, None);
        assert_eq!(failure.class, ErrorClass::PermanentClientError);
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.message, "HTTP 404");
    }

    #[test]
    fn test_to_failure_for_elapsed_budget() {
        let error: TimeoutError<RetryError<SourceError>> = TimeoutError::Elapsed {
            operation: "rendered_capture".to_string(),
            budget: Duration::from_secs(30),
        };

        let failure = to_failure(error, 2, None);
        assert_eq!(failure.class, ErrorClass::Timeout);
        assert_eq!(failure.attempts, 2);
        assert!(failure.message.contains("rendered_capture"));
    }

    #[test]
    fn test_elapsed_budget_keeps_last_failure_class() {
        let error: TimeoutError<RetryError<SourceError>> = TimeoutError::Elapsed {
            operation: "performance".to_string(),
            budget: Duration::from_secs(50),
        };
        let last = SourceError::Remote(RemoteError::http(503)).classify();

        let failure = to_failure(error, 2, Some(last));
        assert_eq!(failure.class, ErrorClass::ServerError);
        assert_eq!(failure.attempts, 2);
        assert!(failure.message.contains("HTTP 503"));
    }

    #[test]
    fn test_default_ceiling() {
        assert_eq!(
            CollectorSettings::default().hard_ceiling,
            Duration::from_secs(60)
        );
    }
}
