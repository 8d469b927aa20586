use anyhow::{Context as _, Result};
use config::{Config as ConfigLoader, ConfigBuilder, Environment, File};
use serde::Deserialize;
use site_scout_collector::{CollectorSettings, PerformanceConfig, ResilienceSettings};
use site_scout_resilience::{BulkheadConfig, CircuitBreakerConfig, ThrottleConfig};
use site_scout_storage::CheckpointSettings;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::logging::LogFormat;

/// Process-level settings, loaded once at startup.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogSettings,
    pub collector: CollectorSection,
    pub breaker: BreakerSection,
    pub checkpoint: CheckpointSection,
    pub performance: PerformanceSection,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectorSection {
    pub hard_ceiling_secs: u64,
    /// Minimum gap between two calls to the same dependency
    pub throttle_spacing_ms: u64,
    pub heavyweight_concurrency: usize,
    pub heavyweight_wait_secs: u64,
    pub drain_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            hard_ceiling_secs: 60,
            throttle_spacing_ms: 1000,
            heavyweight_concurrency: 3,
            heavyweight_wait_secs: 30,
            drain_secs: 10,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub monitoring_window_secs: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_secs: 30,
            monitoring_window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckpointSection {
    pub directory: PathBuf,
    pub staleness_secs: u64,
    /// PostgreSQL is used instead of the directory when set.
    pub database_url: Option<String>,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./checkpoints"),
            staleness_secs: 3600,
            database_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformanceSection {
    /// The performance source is only registered when this is set.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub strategy: String,
}

impl Default for PerformanceSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            strategy: "mobile".to_string(),
        }
    }
}

impl AppConfig {
    /// Layered load: `config/default`, `config/local`, then `SITE_SCOUT__*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        Self::from_builder(
            ConfigLoader::builder()
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config/local").required(false)),
        )
    }

    fn from_builder(
        builder: ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config = builder
            .add_source(
                Environment::with_prefix("SITE_SCOUT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn resilience_settings(&self) -> ResilienceSettings {
        let collector = &self.collector;
        let breaker = &self.breaker;

        ResilienceSettings::default()
            .with_breaker(
                CircuitBreakerConfig::default()
                    .with_failure_threshold(breaker.failure_threshold)
                    .with_recovery_timeout(Duration::from_secs(breaker.recovery_timeout_secs))
                    .with_monitoring_window(Duration::from_secs(breaker.monitoring_window_secs)),
            )
            .with_throttle(ThrottleConfig::new(Duration::from_millis(
                collector.throttle_spacing_ms,
            )))
            .with_bulkhead(
                BulkheadConfig::default()
                    .with_max_concurrent(collector.heavyweight_concurrency)
                    .with_timeout(Duration::from_secs(collector.heavyweight_wait_secs)),
            )
            .with_max_drain(Duration::from_secs(collector.drain_secs))
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings::default()
            .with_hard_ceiling(Duration::from_secs(self.collector.hard_ceiling_secs))
    }

    pub fn checkpoint_settings(&self) -> CheckpointSettings {
        CheckpointSettings {
            staleness_limit: Duration::from_secs(self.checkpoint.staleness_secs),
        }
    }

    /// `None` when no performance endpoint is configured.
    pub fn performance_config(&self) -> Result<Option<PerformanceConfig>> {
        let Some(endpoint) = &self.performance.endpoint else {
            return Ok(None);
        };
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("Invalid performance endpoint '{}'", endpoint))?;

        let mut config =
            PerformanceConfig::new(endpoint).with_strategy(self.performance.strategy.clone());
        if let Some(key) = &self.performance.api_key {
            config = config.with_api_key(key.clone());
        }
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use pretty_assertions::assert_eq;

    fn from_toml(toml: &str) -> Result<AppConfig> {
        AppConfig::from_builder(
            ConfigLoader::builder().add_source(File::from_str(toml, FileFormat::Toml)),
        )
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.collector_settings().hard_ceiling, Duration::from_secs(60));
        assert!(config.performance_config().unwrap().is_none());
    }

    #[test]
    fn test_file_values_override_defaults() {
        let config = from_toml(
            r#"
            [log]
            level = "debug"
            format = "json"

            [collector]
            hard_ceiling_secs = 45
            heavyweight_concurrency = 1

            [breaker]
            failure_threshold = 5

            [performance]
            endpoint = "https://perf.example.test/run"
            api_key = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.collector.throttle_spacing_ms, 1000);

        let resilience = config.resilience_settings();
        assert_eq!(resilience.bulkhead.max_concurrent, 1);
        assert_eq!(resilience.breaker.failure_threshold, 5);
        assert_eq!(config.collector_settings().hard_ceiling, Duration::from_secs(45));

        let performance = config.performance_config().unwrap().unwrap();
        assert_eq!(performance.endpoint.host_str(), Some("perf.example.test"));
        assert_eq!(performance.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid_endpoint_is_reported() {
        let config = from_toml(
            r#"
            [performance]
            endpoint = "not a url"
            "#,
        )
        .unwrap();

        assert!(config.performance_config().is_err());
    }
}
