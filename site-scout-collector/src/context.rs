use site_scout_core::SourceKind;
use site_scout_resilience::{
    Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, RequestThrottler,
    RetryConfig, RetryEngine, ShutdownCoordinator, ThrottleConfig, TimeoutConfig,
    TimeoutSupervisor,
};
use std::sync::Arc;
use std::time::Duration;

/// Settings for every resilience component a collector uses.
#[derive(Debug, Clone)]
pub struct ResilienceSettings {
    pub breaker: CircuitBreakerConfig,
    pub throttle: ThrottleConfig,
    pub retry: RetryConfig,
    pub timeout: TimeoutConfig,
    pub bulkhead: BulkheadConfig,
    pub max_drain: Duration,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            throttle: ThrottleConfig::default(),
            retry: RetryConfig::default(),
            timeout: default_timeouts(),
            bulkhead: BulkheadConfig::default(),
            max_drain: Duration::from_secs(10),
        }
    }
}

impl ResilienceSettings {
    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutConfig) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_bulkhead(mut self, bulkhead: BulkheadConfig) -> Self {
        self.bulkhead = bulkhead;
        self
    }

    pub fn with_max_drain(mut self, max_drain: Duration) -> Self {
        self.max_drain = max_drain;
        self
    }
}

/// Static budgets of the built-in sources. Each stays below the collector's
/// default hard ceiling.
pub fn default_timeouts() -> TimeoutConfig {
    TimeoutConfig::new(Duration::from_secs(30))
        .with_operation(SourceKind::RawHtml.default_name(), Duration::from_secs(20))
        .with_operation(SourceKind::RenderedHtml.default_name(), Duration::from_secs(30))
        .with_operation(
            SourceKind::AboveFoldScreenshot.default_name(),
            Duration::from_secs(30),
        )
        .with_operation(
            SourceKind::FullPageScreenshot.default_name(),
            Duration::from_secs(45),
        )
        .with_operation(SourceKind::Performance.default_name(), Duration::from_secs(50))
}

/// Shared resilience state, constructed once and handed to whoever needs it.
///
/// Nothing here is process-global: tests build their own isolated context.
pub struct ResilienceContext {
    pub breaker: CircuitBreaker,
    pub throttler: RequestThrottler,
    pub retry: RetryEngine,
    pub timeouts: TimeoutSupervisor,
    /// Caps heavyweight (browser) operations across every run.
    pub bulkhead: Bulkhead,
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl ResilienceContext {
    pub fn new(settings: ResilienceSettings) -> Self {
        Self {
            breaker: CircuitBreaker::new(settings.breaker),
            throttler: RequestThrottler::new(settings.throttle),
            retry: RetryEngine::new(settings.retry),
            timeouts: TimeoutSupervisor::new(settings.timeout),
            bulkhead: Bulkhead::new("heavyweight", settings.bulkhead),
            shutdown: Arc::new(ShutdownCoordinator::new(settings.max_drain)),
        }
    }
}

impl Default for ResilienceContext {
    fn default() -> Self {
        Self::new(ResilienceSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budgets_stay_below_ceiling() {
        let timeouts = default_timeouts();
        for kind in [
            SourceKind::RawHtml,
            SourceKind::RenderedHtml,
            SourceKind::AboveFoldScreenshot,
            SourceKind::FullPageScreenshot,
            SourceKind::Performance,
        ] {
            assert!(timeouts.get_timeout(kind.default_name()) < Duration::from_secs(60));
        }
    }
}
