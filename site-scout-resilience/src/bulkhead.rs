//! Process-wide cap on simultaneously active heavyweight operations.
//!
//! Browser sessions are expensive, so every run shares one [`Bulkhead`]
//! regardless of its own parallelism. A caller that cannot get a slot within
//! the configured wait fails with [`BulkheadError::ResourceExhausted`], which
//! the collector surfaces as a hard failure.
//!
//! # Example
//!
//! ```no_run
//! use site_scout_resilience::bulkhead::{Bulkhead, BulkheadConfig};
//!
//! # async fn example() -> Result<(), site_scout_resilience::BulkheadError> {
//! let bulkhead = Bulkhead::new("browser", BulkheadConfig::default());
//!
//! let html = bulkhead.execute(|| async { "<html></html>" }).await?;
//! # Ok(())
//! # }
//! ```

use dashmap::DashMap;
use metrics::{counter, gauge};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Bulkhead-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BulkheadError {
    #[error("No free slot in bulkhead '{name}' after {waited:?}")]
    ResourceExhausted { name: String, waited: Duration },

    #[error("Bulkhead '{0}' is closed")]
    Closed(String),
}

/// Configuration for a bulkhead
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Maximum number of concurrently held permits
    pub max_concurrent: usize,
    /// How long to wait for a permit before giving up
    pub timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

impl BulkheadConfig {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BulkheadStats {
    /// Permits currently held
    pub active: usize,
    /// Permits free right now
    pub available: usize,
    pub acquired: u64,
    pub exhausted: u64,
}

pub struct Bulkhead {
    name: String,
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    counters: DashMap<&'static str, u64>,
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Self {
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
            counters: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    pub fn stats(&self) -> BulkheadStats {
        let available = self.semaphore.available_permits();
        BulkheadStats {
            active: self.config.max_concurrent.saturating_sub(available),
            available,
            acquired: self.counter("acquired"),
            exhausted: self.counter("exhausted"),
        }
    }

    fn counter(&self, key: &'static str) -> u64 {
        self.counters.get(key).map(|v| *v).unwrap_or(0)
    }

    fn increment(&self, key: &'static str) {
        *self.counters.entry(key).or_insert(0) += 1;
        counter!(format!("bulkhead_{}", key), "name" => self.name.clone()).increment(1);
    }

    fn record_active(&self) {
        gauge!("bulkhead_active", "name" => self.name.clone()).set(self.stats().active as f64);
    }

    /// Wait for a slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, BulkheadError> {
        debug!(bulkhead = %self.name, "Acquiring permit");

        match tokio::time::timeout(self.config.timeout, self.semaphore.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => {
                self.increment("acquired");
                self.record_active();
                Ok(permit)
            }
            Ok(Err(_)) => Err(BulkheadError::Closed(self.name.clone())),
            Err(_) => {
                warn!(
                    bulkhead = %self.name,
                    waited_ms = self.config.timeout.as_millis() as u64,
                    "No free slot, giving up"
                );
                self.increment("exhausted");
                Err(BulkheadError::ResourceExhausted {
                    name: self.name.clone(),
                    waited: self.config.timeout,
                })
            }
        }
    }

    /// Run `f` while holding a slot.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T, BulkheadError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = self.acquire().await?;
        let value = f().await;
        drop(permit);
        self.record_active();
        Ok(value)
    }

    /// Refuse new permits; holders keep theirs until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
