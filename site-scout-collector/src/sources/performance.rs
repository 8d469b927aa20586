use async_trait::async_trait;
use serde_json::Value;
use site_scout_core::{PerformanceReport, SourceFailure, SourceKind, SourcePayload};
use site_scout_resilience::FailureDiagnosis;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::raw_fetch::error_for_status;
use super::{CollectionSource, SourceContext, SourceError};

/// Lighthouse audits copied into the report, under their audit ids.
const AUDITS: &[&str] = &[
    "first-contentful-paint",
    "largest-contentful-paint",
    "total-blocking-time",
    "cumulative-layout-shift",
    "speed-index",
    "interactive",
];

#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    pub endpoint: Url,
    pub api_key: Option<String>,
    pub strategy: String,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    pub max_attempts: u32,
}

impl PerformanceConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            api_key: None,
            strategy: "mobile".to_string(),
            request_timeout: Duration::from_secs(45),
            probe_timeout: Duration::from_secs(5),
            max_attempts: 6,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }
}

/// Page-performance report from a PageSpeed-style HTTP API.
///
/// When the API cannot answer, the target is probed with `HEAD` and a report
/// carrying only the diagnosis is served instead.
pub struct PerformanceSource {
    client: reqwest::Client,
    config: PerformanceConfig,
}

impl PerformanceSource {
    pub fn new(config: PerformanceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SourceError::Config(format!("performance client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn request_url(&self, target: &Url) -> Url {
        let mut url = self.config.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("url", target.as_str())
                .append_pair("strategy", &self.config.strategy)
                .append_pair("category", "performance");
            if let Some(key) = &self.config.api_key {
                query.append_pair("key", key);
            }
        }
        url
    }
}

#[async_trait]
impl CollectionSource for PerformanceSource {
    fn name(&self) -> &str {
        SourceKind::Performance.default_name()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Performance
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    async fn collect(&self, ctx: &SourceContext) -> Result<SourcePayload, SourceError> {
        let request = async {
            let response = self.client.get(self.request_url(&ctx.target)).send().await?;
            let response = error_for_status(response).await?;
            Ok::<_, SourceError>(response.json::<Value>().await?)
        };

        let body = tokio::select! {
            biased;

            _ = ctx.cancel.cancelled() => return Err(SourceError::Cancelled),
            result = request => result?,
        };

        let report = parse_report(&body)?;
        debug!(target = %ctx.target, score = ?report.score, "Performance report received");

        Ok(SourcePayload::Performance(report))
    }

    async fn probe(&self, ctx: &SourceContext) -> Option<bool> {
        let alive = self
            .client
            .head(ctx.target.clone())
            .timeout(self.config.probe_timeout)
            .send()
            .await
            .is_ok();
        debug!(target = %ctx.target, alive, "Probed target");
        Some(alive)
    }

    fn degraded(
        &self,
        diagnosis: FailureDiagnosis,
        _failure: &SourceFailure,
    ) -> Option<SourcePayload> {
        Some(SourcePayload::Performance(PerformanceReport {
            score: None,
            metrics: BTreeMap::new(),
            diagnosis: Some(diagnosis.as_str().to_string()),
        }))
    }
}

/// Extract the performance score and audit values from a Lighthouse result.
pub fn parse_report(body: &Value) -> Result<PerformanceReport, SourceError> {
    let lighthouse = body
        .get("lighthouseResult")
        .ok_or_else(|| SourceError::Malformed("missing lighthouseResult".to_string()))?;

    let score = lighthouse
        .pointer("/categories/performance/score")
        .and_then(Value::as_f64);

    let metrics = AUDITS
        .iter()
        .filter_map(|audit| {
            lighthouse
                .pointer(&format!("/audits/{}/numericValue", audit))
                .and_then(Value::as_f64)
                .map(|value| (audit.to_string(), value))
        })
        .collect();

    Ok(PerformanceReport {
        score,
        metrics,
        diagnosis: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_report() {
        let body = json!({
            "lighthouseResult": {
                "categories": {"performance": {"score": 0.87}},
                "audits": {
                    "first-contentful-paint": {"numericValue": 812.5},
                    "cumulative-layout-shift": {"numericValue": 0.02},
                    "unrelated-audit": {"numericValue": 3.0}
                }
            }
        });

        let report = parse_report(&body).unwrap();
        assert_eq!(report.score, Some(0.87));
        assert_eq!(report.metrics.len(), 2);
        assert_eq!(report.metrics["first-contentful-paint"], 812.5);
        assert_eq!(report.diagnosis, None);
    }

    #[test]
    fn test_parse_report_without_lighthouse_result() {
        let result = parse_report(&json!({"error": {"code": 500}}));
        assert!(matches!(result, Err(SourceError::Malformed(_))));
    }

    #[test]
    fn test_request_url_carries_target_and_key() {
        let source = PerformanceSource::new(
            PerformanceConfig::new(Url::parse("https://perf.example.test/run").unwrap())
                .with_api_key("k-123"),
        )
        .unwrap();

        let url = source.request_url(&Url::parse("https://example.test/").unwrap());
        let pairs: BTreeMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs["url"], "https://example.test/");
        assert_eq!(pairs["key"], "k-123");
        assert_eq!(pairs["strategy"], "mobile");
    }

    #[test]
    fn test_degraded_report_names_diagnosis() {
        let source = PerformanceSource::new(PerformanceConfig::new(
            Url::parse("https://perf.example.test/run").unwrap(),
        ))
        .unwrap();
        let failure = SourceFailure::new(site_scout_core::ErrorClass::ServerError, "HTTP 503", 6);

        let payload = source.degraded(FailureDiagnosis::DependencyDown, &failure);

        match payload {
            Some(SourcePayload::Performance(report)) => {
                assert_eq!(report.score, None);
                assert_eq!(
                    report.diagnosis.as_deref(),
                    Some(FailureDiagnosis::DependencyDown.as_str())
                );
            }
            other => panic!("expected degraded report, got {:?}", other),
        }
    }
}
