use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use site_scout_core::{SourceKind, SourcePayload};
use site_scout_resilience::{parse_retry_after, RemoteError};
use std::time::Duration;
use tracing::debug;

use super::{CollectionSource, SourceContext, SourceError};

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct RawFetchConfig {
    pub user_agent: String,
    pub request_timeout: Duration,
    pub max_redirects: usize,
}

impl Default for RawFetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("site-scout/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(15),
            max_redirects: 5,
        }
    }
}

impl RawFetchConfig {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Plain HTTP GET of the target document, without running any script.
pub struct RawFetchSource {
    client: reqwest::Client,
    config: RawFetchConfig,
}

impl RawFetchSource {
    pub fn new(config: RawFetchConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SourceError::Config(format!("raw fetch client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RawFetchConfig {
        &self.config
    }
}

#[async_trait]
impl CollectionSource for RawFetchSource {
    fn name(&self) -> &str {
        SourceKind::RawHtml.default_name()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::RawHtml
    }

    async fn collect(&self, ctx: &SourceContext) -> Result<SourcePayload, SourceError> {
        let request = async {
            let response = self.client.get(ctx.target.clone()).send().await?;
            let response = error_for_status(response).await?;
            let final_url = response.url().to_string();
            let content = response.text().await?;
            Ok::<_, SourceError>((content, final_url))
        };

        let (content, final_url) = tokio::select! {
            biased;

            _ = ctx.cancel.cancelled() => return Err(SourceError::Cancelled),
            result = request => result?,
        };

        debug!(
            target = %ctx.target,
            bytes = content.len(),
            "Fetched raw HTML"
        );

        Ok(SourcePayload::Html {
            content,
            final_url: Some(final_url),
        })
    }
}

/// Turn a non-2xx response into [`RemoteError::Http`], keeping the start of
/// the body and any `Retry-After` hint for classification.
pub async fn error_for_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    Err(SourceError::Remote(RemoteError::Http {
        status: status.as_u16(),
        body: if body.is_empty() { None } else { Some(body) },
        retry_after,
    }))
}
