//! Built-in sources against a local HTTP server and a scripted browser.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use site_scout_collector::{
    BrowserEngine, BrowserSession, Navigation, ParallelDataCollector, PerformanceConfig,
    PerformanceSource, RawFetchConfig, RawFetchSource, RenderedHtmlSource, ResilienceContext, ResilienceSettings,
    ScreenshotSource, SourceError, UnavailableBrowser,
};
use site_scout_core::{
    CollectorConfig, DataQuality, ErrorClass, HtmlOrigin, QualityTier, SourceKind, Viewport,
};
use site_scout_resilience::{RetryConfig, ThrottleConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_settings() -> ResilienceSettings {
    let retry = RetryConfig {
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        jitter: 0.0,
        server_error_min: Duration::from_millis(5),
        server_error_max: Duration::from_millis(20),
        rate_limit_min: Duration::from_millis(5),
        rate_limit_max: Duration::from_millis(20),
        ..RetryConfig::default()
    };

    ResilienceSettings::default()
        .with_retry(retry)
        .with_throttle(ThrottleConfig::new(Duration::from_millis(1)))
}

fn collector() -> ParallelDataCollector {
    ParallelDataCollector::new(Arc::new(ResilienceContext::new(fast_settings())))
}

fn raw_fetch() -> RawFetchSource {
    RawFetchSource::new(RawFetchConfig::default()).unwrap()
}

// ===== Raw fetch =====

#[tokio::test]
async fn test_raw_fetch_returns_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><title>Local</title></html>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let collector = collector().with_source(Arc::new(raw_fetch()));
    let result = collector
        .collect_all(&server.uri(), &CollectorConfig::default())
        .await
        .unwrap();

    assert_eq!(result.data_quality, DataQuality::Full);
    assert_eq!(result.html.origin, HtmlOrigin::Raw);
    assert!(result.html.content.contains("<title>Local</title>"));
}

#[tokio::test]
async fn test_raw_fetch_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let collector = collector().with_source(Arc::new(raw_fetch()));
    let result = collector
        .collect_all(&server.uri(), &CollectorConfig::default())
        .await
        .unwrap();

    let outcome = result.outcome("raw_fetch").unwrap();
    assert!(!outcome.succeeded);
    let error = outcome.error.as_ref().unwrap();
    assert_eq!(error.class, ErrorClass::PermanentClientError);
    assert_eq!(error.attempts, 1);
    assert_eq!(result.html.origin, HtmlOrigin::Placeholder);
}

#[tokio::test]
async fn test_raw_fetch_server_error_uses_every_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let collector = collector().with_source(Arc::new(raw_fetch()));
    let result = collector
        .collect_all(&server.uri(), &CollectorConfig::default())
        .await
        .unwrap();

    let error = result.outcome("raw_fetch").unwrap().error.clone().unwrap();
    assert_eq!(error.class, ErrorClass::ServerError);
    assert_eq!(error.attempts, 3);
}

// ===== Performance =====

#[tokio::test]
async fn test_performance_report_parsed_from_api() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/runPagespeed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "lighthouseResult": {
                "categories": { "performance": { "score": 0.87 } },
                "audits": {
                    "first-contentful-paint": { "numericValue": 1200.5 },
                    "speed-index": { "numericValue": 2400.0 }
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = Url::parse(&format!("{}/runPagespeed", server.uri())).unwrap();
    let collector = collector()
        .with_source(Arc::new(
            PerformanceSource::new(PerformanceConfig::new(endpoint)).unwrap(),
        ));

    let result = collector
        .collect_all("https://example.test", &CollectorConfig::default())
        .await
        .unwrap();

    let report = result.performance().unwrap();
    assert_eq!(report.score, Some(0.87));
    assert_eq!(report.metrics.get("speed-index"), Some(&2400.0));
    assert_eq!(report.diagnosis, None);
}

#[tokio::test]
async fn test_performance_api_down_yields_diagnosed_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/runPagespeed"))
        .respond_with(ResponseTemplate::new(503))
        .expect(6)
        .mount(&server)
        .await;

    let endpoint = Url::parse(&format!("{}/runPagespeed", server.uri())).unwrap();
    let collector = collector()
        .with_source(Arc::new(
            PerformanceSource::new(PerformanceConfig::new(endpoint)).unwrap(),
        ));

    // The target is the same local server, so the liveness probe answers.
    let result = collector
        .collect_all(&server.uri(), &CollectorConfig::default())
        .await
        .unwrap();

    let outcome = result.outcome("performance").unwrap();
    assert_eq!(outcome.quality_tier, QualityTier::Degraded);

    let error = outcome.error.as_ref().unwrap();
    assert_eq!(error.class, ErrorClass::ServerError);
    assert_eq!(error.attempts, 6);

    let report = result.performance().unwrap();
    assert_eq!(report.score, None);
    assert_eq!(report.diagnosis.as_deref(), Some("dependency_down"));
}

// ===== Browser sources =====

#[tokio::test]
async fn test_http_only_mode_falls_back_to_raw_html() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>raw</html>"))
        .mount(&server)
        .await;

    let engine: Arc<dyn BrowserEngine> = Arc::new(UnavailableBrowser);
    let output = tempfile::tempdir().unwrap();
    let collector = collector()
        .with_source(Arc::new(raw_fetch()))
        .with_source(Arc::new(RenderedHtmlSource::new(engine.clone())))
        .with_source(Arc::new(ScreenshotSource::above_fold(engine.clone())))
        .with_source(Arc::new(ScreenshotSource::full_page(engine)));

    let config = CollectorConfig::default().with_output_directory(output.path());
    let result = collector.collect_all(&server.uri(), &config).await.unwrap();

    assert_eq!(result.data_quality, DataQuality::Fallback);
    assert_eq!(result.html.origin, HtmlOrigin::Raw);
    assert_eq!(result.html.content, "<html>raw</html>");
    assert_eq!(result.timing.sources.len(), 4);

    let rendered = result.outcome("rendered_capture").unwrap();
    assert!(rendered.error.as_ref().unwrap().message.contains("no browser backend"));
}

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Browser that serves a fixed page and a header-only PNG.
#[derive(Default)]
struct ScriptedBrowser {
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

struct ScriptedPage {
    url: Option<Url>,
    viewport: Viewport,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserEngine for ScriptedBrowser {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open_session(
        &self,
        viewport: Viewport,
    ) -> Result<Box<dyn BrowserSession>, SourceError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPage {
            url: None,
            viewport,
            closed: self.closed.clone(),
        }))
    }

    async fn shutdown(&self) -> Result<(), SourceError> {
        Ok(())
    }

    fn active_sessions(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserSession for ScriptedPage {
    async fn navigate(&mut self, url: &Url) -> Result<Navigation, SourceError> {
        self.url = Some(url.clone());
        Ok(Navigation {
            final_url: url.to_string(),
            status: 200,
        })
    }

    async fn html(&self) -> Result<String, SourceError> {
        let url = self.url.as_ref().map(Url::as_str).unwrap_or_default();
        Ok(format!("<html><body data-url=\"{}\">rendered</body></html>", url))
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, SourceError> {
        let height = if full_page {
            self.viewport.height * 4
        } else {
            self.viewport.height
        };
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&13u32.to_be_bytes());
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&self.viewport.width.to_be_bytes());
        png.extend_from_slice(&height.to_be_bytes());
        Ok(png)
    }

    async fn close(self: Box<Self>) -> Result<(), SourceError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_browser_sources_write_captures_and_close_sessions() {
    let browser = Arc::new(ScriptedBrowser::default());
    let engine: Arc<dyn BrowserEngine> = browser.clone();
    let output = tempfile::tempdir().unwrap();

    let collector = collector()
        .with_source(Arc::new(RenderedHtmlSource::new(engine.clone())))
        .with_source(Arc::new(ScreenshotSource::above_fold(engine.clone())))
        .with_source(Arc::new(ScreenshotSource::full_page(engine)));

    let config = CollectorConfig::default()
        .with_viewport(Viewport::new(1280, 720))
        .with_output_directory(output.path().join("captures"));
    let result = collector
        .collect_all("https://example.test", &config)
        .await
        .unwrap();

    assert_eq!(result.data_quality, DataQuality::Full);
    assert_eq!(result.html.origin, HtmlOrigin::Rendered);
    assert!(result.html.content.contains("rendered"));

    let above = result.screenshot(SourceKind::AboveFoldScreenshot).unwrap();
    assert!(above.path.exists());
    assert_eq!((above.width, above.height), (1280, 720));
    assert!(!above.full_page);

    let full = result.screenshot(SourceKind::FullPageScreenshot).unwrap();
    assert!(full.path.exists());
    assert_eq!((full.width, full.height), (1280, 2880));
    assert_ne!(above.path, full.path);

    assert_eq!(browser.opened.load(Ordering::SeqCst), 3);
    assert_eq!(browser.active_sessions(), 0);
}
