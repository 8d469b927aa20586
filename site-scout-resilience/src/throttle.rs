//! Per-dependency request spacing.
//!
//! Calls to the same dependency run one after another, with at least
//! `min_delay` between the end of one call and the start of the next.
//! Waiters are served in arrival order. Different dependencies never wait on
//! each other.

use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum gap between a call settling and the next one starting
    pub min_delay: Duration,
    /// Per-dependency overrides of `min_delay`
    pub overrides: HashMap<String, Duration>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            overrides: HashMap::new(),
        }
    }
}

impl ThrottleConfig {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, dependency: impl Into<String>, min_delay: Duration) -> Self {
        self.overrides.insert(dependency.into(), min_delay);
        self
    }

    pub fn delay_for(&self, dependency: &str) -> Duration {
        self.overrides
            .get(dependency)
            .copied()
            .unwrap_or(self.min_delay)
    }
}

#[derive(Debug, Default)]
struct Lane {
    last_request: Option<Instant>,
}

/// Serializes calls per dependency name.
pub struct RequestThrottler {
    config: ThrottleConfig,
    lanes: DashMap<String, Arc<Mutex<Lane>>>,
}

impl RequestThrottler {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            lanes: DashMap::new(),
        }
    }

    fn lane(&self, dependency: &str) -> Arc<Mutex<Lane>> {
        self.lanes
            .entry(dependency.to_string())
            .or_default()
            .clone()
    }

    /// Run `operation` once the dependency's lane is free and spaced.
    ///
    /// The lane stays held for the whole call and the spacing clock restarts
    /// when it settles, whether it succeeded or not.
    pub async fn throttle<T, F, Fut>(&self, dependency: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lane = self.lane(dependency);
        let mut guard = lane.lock().await;

        let min_delay = self.config.delay_for(dependency);
        if let Some(last) = guard.last_request {
            let elapsed = last.elapsed();
            if elapsed < min_delay {
                let wait = min_delay - elapsed;
                debug!(
                    dependency = %dependency,
                    wait_ms = wait.as_millis() as u64,
                    "Throttling request"
                );
                sleep(wait).await;
            }
        }

        let result = operation().await;
        guard.last_request = Some(Instant::now());
        result
    }

    /// Dependencies that currently have a lane.
    pub fn tracked(&self) -> usize {
        self.lanes.len()
    }
}

impl Default for RequestThrottler {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}
