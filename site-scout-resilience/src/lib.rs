//! Resilience patterns for calling unreliable collection dependencies.
//!
//! - **Circuit Breaker**: stops calling a dependency for a cooldown period after
//!   repeated failures, one state per named dependency
//! - **Throttle**: enforces a minimum spacing between calls to the same dependency
//! - **Retry**: classifies failures and backs off per error class
//! - **Timeout**: warn-then-cancel deadlines with adaptive budgets
//! - **Bulkhead**: caps concurrently active heavyweight operations
//! - **Shutdown**: drains in-flight operations before releasing shared resources
//!
//! # Example
//!
//! ```no_run
//! use site_scout_resilience::{
//!     circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
//!     throttle::{RequestThrottler, ThrottleConfig},
//! };
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
//! let throttler = RequestThrottler::new(ThrottleConfig::default());
//!
//! let outcome = breaker
//!     .execute(
//!         "raw_fetch",
//!         || throttler.throttle("raw_fetch", || async { Ok::<_, std::io::Error>(42) }),
//!         Some(|| 0),
//!     )
//!     .await;
//! assert!(outcome.is_success());
//! # }
//! ```

pub mod bulkhead;
pub mod circuit_breaker;
pub mod outcome;
pub mod retry;
pub mod shutdown;
pub mod throttle;
pub mod timeout;

// Re-export commonly used types
pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadError, BulkheadStats};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats,
    CircuitState, DependencyState,
};
pub use outcome::{DegradeReason, Outcome};
pub use retry::{
    classify_status, diagnose, parse_retry_after, Classify, ClassifiedError, FailureDiagnosis,
    RemoteError, RetryConfig, RetryEngine, RetryError,
};
pub use shutdown::{
    DrainOutcome, GracefulShutdown, OperationGuard, ShutdownCoordinator, ShutdownError,
    ShutdownSignal,
};
pub use throttle::{RequestThrottler, ThrottleConfig};
pub use timeout::{
    with_timeout, TimeoutConfig, TimeoutError, TimeoutHandle, TimeoutHooks, TimeoutState,
    TimeoutSupervisor, WarningDecision,
};
