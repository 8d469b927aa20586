//! Draining in-flight collection work before shared resources are released.
//!
//! Every collection operation holds an [`OperationGuard`] while it runs. On
//! shutdown the coordinator stops handing out guards, waits up to `max_drain`
//! for the outstanding ones to drop, then cancels the force-close token so
//! stragglers abort instead of leaking. Only then are registered components
//! (browser pools, database pools) shut down.
//!
//! # Example
//!
//! ```no_run
//! use site_scout_resilience::shutdown::{ShutdownCoordinator, ShutdownSignal};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let signal = ShutdownSignal::new();
//! let coordinator = ShutdownCoordinator::new(Duration::from_secs(10));
//!
//! signal.wait().await;
//! coordinator.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shutdown signal handler
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for SIGINT or SIGTERM (or a manual trigger).
    pub async fn wait(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
            _ = terminate => info!("Received SIGTERM"),
            _ = self.token.cancelled() => return,
        }

        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn trigger(&self) {
        info!("Manually triggering shutdown");
        self.token.cancel();
    }

    /// Resolves once the signal fired.
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }
}

/// Trait for components that support graceful shutdown
#[async_trait]
pub trait GracefulShutdown: Send + Sync {
    async fn shutdown(&self) -> Result<(), ShutdownError>;

    fn name(&self) -> &str;
}

/// Shutdown errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShutdownError {
    #[error("Shutdown timed out after {0:?}")]
    Timeout(Duration),

    #[error("Component {component} shutdown failed: {reason}")]
    ComponentFailed { component: String, reason: String },

    #[error("Shutdown already in progress")]
    AlreadyShuttingDown,
}

/// How the drain phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    /// `max_drain` ran out; this many operations were force-closed
    Forced { remaining: usize },
}

pub struct ShutdownCoordinator {
    max_drain: Duration,
    component_timeout: Duration,
    in_flight: Arc<AtomicUsize>,
    is_shutting_down: AtomicBool,
    force: CancellationToken,
    components: RwLock<Vec<Arc<dyn GracefulShutdown>>>,
}

impl ShutdownCoordinator {
    pub fn new(max_drain: Duration) -> Self {
        Self {
            max_drain,
            component_timeout: Duration::from_secs(5),
            in_flight: Arc::new(AtomicUsize::new(0)),
            is_shutting_down: AtomicBool::new(false),
            force: CancellationToken::new(),
            components: RwLock::new(Vec::new()),
        }
    }

    pub fn with_component_timeout(mut self, timeout: Duration) -> Self {
        self.component_timeout = timeout;
        self
    }

    pub async fn register_component(&self, component: Arc<dyn GracefulShutdown>) {
        self.components.write().await.push(component);
    }

    /// Register an operation as in flight. `None` once shutdown has begun.
    ///
    /// The count goes up before the flag is read, so the drain either sees
    /// this operation or the operation sees the flag and backs out.
    pub fn track(&self) -> Option<OperationGuard> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.is_shutting_down() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(OperationGuard {
            in_flight: self.in_flight.clone(),
            force: self.force.clone(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Cancelled when in-flight operations are force-closed.
    pub fn force_token(&self) -> CancellationToken {
        self.force.clone()
    }

    /// Drain, force-close leftovers, then shut components down in
    /// registration order.
    pub async fn shutdown(&self) -> Result<DrainOutcome, ShutdownError> {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ShutdownError::AlreadyShuttingDown);
        }

        info!(in_flight = self.in_flight(), "Starting graceful shutdown");

        let drained = self.drain().await;
        self.shutdown_components().await?;

        info!(outcome = ?drained, "Graceful shutdown completed");
        Ok(drained)
    }

    async fn drain(&self) -> DrainOutcome {
        let start = Instant::now();
        let check_interval = Duration::from_millis(100);

        while self.in_flight() > 0 {
            if start.elapsed() >= self.max_drain {
                let remaining = self.in_flight();
                warn!(
                    remaining,
                    max_drain_ms = self.max_drain.as_millis() as u64,
                    "Drain time exceeded, force-closing in-flight operations"
                );
                self.force.cancel();
                return DrainOutcome::Forced { remaining };
            }

            debug!(in_flight = self.in_flight(), "Waiting for operations to finish");
            sleep(check_interval).await;
        }

        DrainOutcome::Drained
    }

    async fn shutdown_components(&self) -> Result<(), ShutdownError> {
        let components = self.components.read().await;
        let mut first_error = None;

        for component in components.iter() {
            let name = component.name();

            let failure = match timeout(self.component_timeout, component.shutdown()).await {
                Ok(Ok(())) => {
                    info!(component = %name, "Component shut down");
                    None
                }
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("timed out after {:?}", self.component_timeout)),
            };

            if let Some(reason) = failure {
                warn!(component = %name, reason = %reason, "Component shutdown failed");
                first_error.get_or_insert(ShutdownError::ComponentFailed {
                    component: name.to_string(),
                    reason,
                });
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Marks one operation as in flight until dropped.
pub struct OperationGuard {
    in_flight: Arc<AtomicUsize>,
    force: CancellationToken,
}

impl OperationGuard {
    /// Cancelled if shutdown force-closes in-flight work.
    pub fn force_token(&self) -> CancellationToken {
        self.force.clone()
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct TestComponent {
        name: String,
        should_fail: bool,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl GracefulShutdown for TestComponent {
        async fn shutdown(&self) -> Result<(), ShutdownError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.should_fail {
                return Err(ShutdownError::ComponentFailed {
                    component: self.name.clone(),
                    reason: "pool refused to close".to_string(),
                });
            }
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn test_signal_manual_trigger() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        signal.trigger();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_guard_tracks_and_rejects_after_shutdown() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));

        let guard = coordinator.track().unwrap();
        assert_eq!(coordinator.in_flight(), 1);
        drop(guard);
        assert_eq!(coordinator.in_flight(), 0);

        assert_eq!(coordinator.shutdown().await.unwrap(), DrainOutcome::Drained);
        assert!(coordinator.track().is_none());
    }

    #[tokio::test]
    async fn test_rejected_track_leaves_count_untouched() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator.shutdown().await.unwrap();

        for _ in 0..3 {
            assert!(coordinator.track().is_none());
        }
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_operation_admitted_once_drained() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(5)));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    let mut admitted = 0u32;
                    while let Some(guard) = coordinator.track() {
                        admitted += 1;
                        tokio::task::yield_now().await;
                        drop(guard);
                    }
                    admitted
                })
            })
            .collect();

        sleep(Duration::from_millis(20)).await;
        assert_eq!(coordinator.shutdown().await.unwrap(), DrainOutcome::Drained);

        for worker in workers {
            worker.await.unwrap();
        }
        assert_eq!(coordinator.in_flight(), 0);
        assert!(coordinator.track().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_in_flight_operation() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(10)));
        let guard = coordinator.track().unwrap();

        tokio::spawn(async move {
            sleep(Duration::from_secs(2)).await;
            drop(guard);
        });

        let start = Instant::now();
        assert_eq!(coordinator.shutdown().await.unwrap(), DrainOutcome::Drained);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(!coordinator.force_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_closes_after_max_drain() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(10));
        let guard = coordinator.track().unwrap();
        let token = guard.force_token();

        let outcome = coordinator.shutdown().await.unwrap();

        assert_eq!(outcome, DrainOutcome::Forced { remaining: 1 });
        assert!(token.is_cancelled());
        drop(guard);
    }

    #[tokio::test]
    async fn test_components_shut_down_after_drain() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));

        coordinator
            .register_component(Arc::new(TestComponent {
                name: "browser".to_string(),
                should_fail: true,
                calls: calls.clone(),
            }))
            .await;
        coordinator
            .register_component(Arc::new(TestComponent {
                name: "database".to_string(),
                should_fail: false,
                calls: calls.clone(),
            }))
            .await;

        let result = coordinator.shutdown().await;

        assert!(matches!(
            result,
            Err(ShutdownError::ComponentFailed { ref component, .. }) if component == "browser"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_prevents_double_shutdown() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator.shutdown().await.unwrap();

        assert!(matches!(
            coordinator.shutdown().await,
            Err(ShutdownError::AlreadyShuttingDown)
        ));
    }
}
