//! Browser automation seam.
//!
//! Browser-based sources never share a page: every operation opens its own
//! [`BrowserSession`], and the session is closed on every exit path, including
//! cancellation and a dropped operation future, so a forced timeout or an
//! aborted run cannot leave state behind for a sibling.

use async_trait::async_trait;
use futures::future::BoxFuture;
use site_scout_core::Viewport;
use site_scout_resilience::{GracefulShutdown, ShutdownError};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::SourceError;

/// Where a navigation ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub final_url: String,
    pub status: u16,
}

/// A browser backend able to open isolated sessions.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn open_session(
        &self,
        viewport: Viewport,
    ) -> Result<Box<dyn BrowserSession>, SourceError>;

    /// Release the engine once no session is in use.
    async fn shutdown(&self) -> Result<(), SourceError>;

    fn active_sessions(&self) -> usize;
}

/// One isolated browser context.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&mut self, url: &Url) -> Result<Navigation, SourceError>;

    /// Serialized DOM of the current page.
    async fn html(&self) -> Result<String, SourceError>;

    /// PNG bytes of the viewport, or of the whole document when `full_page`.
    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, SourceError>;

    async fn close(self: Box<Self>) -> Result<(), SourceError>;
}

/// Engine used when no browser backend is configured.
///
/// Every session request fails, so browser-based sources degrade while the
/// HTTP-based ones keep working.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBrowser;

#[async_trait]
impl BrowserEngine for UnavailableBrowser {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn open_session(
        &self,
        _viewport: Viewport,
    ) -> Result<Box<dyn BrowserSession>, SourceError> {
        Err(SourceError::Browser(
            "no browser backend configured, HTTP-only mode".to_string(),
        ))
    }

    async fn shutdown(&self) -> Result<(), SourceError> {
        Ok(())
    }

    fn active_sessions(&self) -> usize {
        0
    }
}

/// Owns an open session until it is closed.
///
/// Dropping the guard with the session still open (an aborted task, a future
/// dropped by a timeout or a forced shutdown) hands the close to the runtime.
struct SessionGuard {
    engine: String,
    session: Option<Box<dyn BrowserSession>>,
}

impl SessionGuard {
    fn new(engine: &str, session: Box<dyn BrowserSession>) -> Self {
        Self {
            engine: engine.to_string(),
            session: Some(session),
        }
    }

    fn session(&mut self) -> Result<&mut Box<dyn BrowserSession>, SourceError> {
        self.session
            .as_mut()
            .ok_or_else(|| SourceError::Browser("session already closed".to_string()))
    }

    async fn close(mut self) {
        if let Some(session) = self.session.take() {
            close_session(&self.engine, session).await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        match Handle::try_current() {
            Ok(handle) => {
                debug!(engine = %self.engine, "Closing browser session of a dropped operation");
                let engine = std::mem::take(&mut self.engine);
                handle.spawn(async move { close_session(&engine, session).await });
            }
            Err(_) => warn!(engine = %self.engine, "No runtime to close browser session"),
        }
    }
}

async fn close_session(engine: &str, session: Box<dyn BrowserSession>) {
    if let Err(e) = session.close().await {
        warn!(engine = %engine, error = %e, "Failed to close browser session");
    }
}

/// Run `f` inside a fresh session that is always closed afterwards.
pub async fn with_session<T, F>(
    engine: &dyn BrowserEngine,
    viewport: Viewport,
    cancel: &CancellationToken,
    f: F,
) -> Result<T, SourceError>
where
    F: for<'a> FnOnce(&'a mut Box<dyn BrowserSession>) -> BoxFuture<'a, Result<T, SourceError>>,
{
    let mut guard = SessionGuard::new(engine.name(), engine.open_session(viewport).await?);
    debug!(engine = %engine.name(), "Browser session opened");

    let result = match guard.session() {
        Ok(session) => tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(SourceError::Cancelled),
            result = f(session) => result,
        },
        Err(e) => Err(e),
    };

    guard.close().await;
    result
}

/// Shuts a browser engine down as part of the process shutdown sequence.
pub struct BrowserShutdown {
    engine: Arc<dyn BrowserEngine>,
}

impl BrowserShutdown {
    pub fn new(engine: Arc<dyn BrowserEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl GracefulShutdown for BrowserShutdown {
    async fn shutdown(&self) -> Result<(), ShutdownError> {
        self.engine
            .shutdown()
            .await
            .map_err(|e| ShutdownError::ComponentFailed {
                component: self.engine.name().to_string(),
                reason: e.to_string(),
            })
    }

    fn name(&self) -> &str {
        self.engine.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingEngine {
        closed: Arc<AtomicUsize>,
    }

    struct CountingSession {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BrowserEngine for CountingEngine {
        fn name(&self) -> &str {
            "counting"
        }

        async fn open_session(
            &self,
            _viewport: Viewport,
        ) -> Result<Box<dyn BrowserSession>, SourceError> {
            Ok(Box::new(CountingSession {
                closed: self.closed.clone(),
            }))
        }

        async fn shutdown(&self) -> Result<(), SourceError> {
            Ok(())
        }

        fn active_sessions(&self) -> usize {
            0
        }
    }

    #[async_trait]
    impl BrowserSession for CountingSession {
        async fn navigate(&mut self, url: &Url) -> Result<Navigation, SourceError> {
            Ok(Navigation {
                final_url: url.to_string(),
                status: 200,
            })
        }

        async fn html(&self) -> Result<String, SourceError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok("<html></html>".to_string())
        }

        async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>, SourceError> {
            Err(SourceError::Browser("capture failed".to_string()))
        }

        async fn close(self: Box<Self>) -> Result<(), SourceError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unavailable_browser_refuses_sessions() {
        let result = UnavailableBrowser.open_session(Viewport::default()).await;
        assert!(matches!(result, Err(SourceError::Browser(_))));
    }

    #[tokio::test]
    async fn test_session_closed_after_error() {
        let closed = Arc::new(AtomicUsize::new(0));
        let engine = CountingEngine {
            closed: closed.clone(),
        };

        let cancel = CancellationToken::new();
        let result = with_session(&engine, Viewport::default(), &cancel, |session| {
            Box::pin(async move { session.screenshot(false).await })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_closed_after_cancellation() {
        let closed = Arc::new(AtomicUsize::new(0));
        let engine = CountingEngine {
            closed: closed.clone(),
        };
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = with_session(&engine, Viewport::default(), &cancel, |session| {
            Box::pin(async move { session.html().await })
        })
        .await;

        assert!(matches!(result, Err(SourceError::Cancelled)));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_closed_when_operation_is_dropped() {
        let closed = Arc::new(AtomicUsize::new(0));
        let engine = CountingEngine {
            closed: closed.clone(),
        };
        let cancel = CancellationToken::new();

        // The token is never cancelled; the outer timeout drops the future.
        let dropped = tokio::time::timeout(
            Duration::from_secs(1),
            with_session(&engine, Viewport::default(), &cancel, |session| {
                Box::pin(async move { session.html().await })
            }),
        )
        .await;
        assert!(dropped.is_err());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
