pub mod browser;
pub mod performance;
pub mod raw_fetch;
pub mod rendered;
pub mod screenshot;

pub use browser::*;
pub use performance::*;
pub use raw_fetch::*;
pub use rendered::*;
pub use screenshot::*;

use async_trait::async_trait;
use site_scout_core::{
    CollectorConfig, CoreError, ErrorClass, RunId, SourceFailure, SourceKind, SourcePayload,
};
use site_scout_resilience::{Classify, ClassifiedError, FailureDiagnosis, RemoteError};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Everything one collection operation needs for one run.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub run_id: RunId,
    pub target: Url,
    pub config: CollectorConfig,
    /// Cancelled when the operation's budget expires or the run is aborted.
    pub cancel: CancellationToken,
}

impl SourceContext {
    pub fn new(run_id: RunId, target: Url, config: CollectorConfig) -> Self {
        Self {
            run_id,
            target,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Remote(remote_error_from_reqwest(&err))
    }
}

impl Classify for SourceError {
    fn classify(&self) -> ClassifiedError {
        match self {
            SourceError::Remote(remote) => remote.classify(),
            SourceError::Browser(message) => {
                RemoteError::Network(message.clone()).classify()
            }
            SourceError::Cancelled => ClassifiedError {
                class: ErrorClass::Timeout,
                retry_after: None,
                message: self.to_string(),
            },
            SourceError::Config(_) => ClassifiedError {
                class: ErrorClass::PermanentClientError,
                retry_after: None,
                message: self.to_string(),
            },
            SourceError::Io(_) | SourceError::Malformed(_) => ClassifiedError {
                class: ErrorClass::Unknown,
                retry_after: None,
                message: self.to_string(),
            },
        }
    }
}

/// Map a transport-level `reqwest` error onto the remote error model.
pub fn remote_error_from_reqwest(err: &reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if let Some(status) = err.status() {
        RemoteError::http(status.as_u16())
    } else if err.is_connect() || err.is_request() {
        RemoteError::Network(err.to_string())
    } else {
        RemoteError::Other(err.to_string())
    }
}

/// Normalize a target identifier into an absolute http(s) URL.
///
/// A bare host such as `example.test` is treated as `https://example.test/`.
pub fn parse_target(target: &str) -> site_scout_core::Result<Url> {
    let target = target.trim();
    let candidate = if target.contains("://") {
        target.to_string()
    } else {
        format!("https://{}", target)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| CoreError::Validation(format!("invalid target '{}': {}", target, e)))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(CoreError::Validation(format!(
            "target '{}' is not an http(s) URL with a host",
            target
        )));
    }

    Ok(url)
}

/// One independent way of collecting data about a target.
#[async_trait]
pub trait CollectionSource: Send + Sync {
    /// Dependency name used for circuit, throttle and timeout bookkeeping.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Heavyweight sources hold a bulkhead slot while they run.
    fn is_heavyweight(&self) -> bool {
        false
    }

    fn max_attempts(&self) -> u32 {
        3
    }

    /// Whether this source takes part in a run with the given options.
    fn enabled(&self, _config: &CollectorConfig) -> bool {
        true
    }

    async fn collect(&self, ctx: &SourceContext) -> Result<SourcePayload, SourceError>;

    /// Cheap stand-in served while the source's circuit is open.
    fn fallback(&self, target: &Url) -> SourcePayload {
        SourcePayload::Placeholder {
            note: format!("{} unavailable for {}", self.name(), target),
        }
    }

    /// Liveness check of the target, run once the source has failed.
    async fn probe(&self, _ctx: &SourceContext) -> Option<bool> {
        None
    }

    /// Degraded payload for a failure, given its diagnosis. `None` keeps the
    /// failure as is.
    fn degraded(
        &self,
        _diagnosis: FailureDiagnosis,
        _failure: &SourceFailure,
    ) -> Option<SourcePayload> {
        None
    }
}
