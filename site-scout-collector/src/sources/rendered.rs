use async_trait::async_trait;
use site_scout_core::{SourceKind, SourcePayload};
use site_scout_resilience::RemoteError;
use std::sync::Arc;
use tracing::debug;

use super::{with_session, BrowserEngine, CollectionSource, SourceContext, SourceError};

/// DOM after scripts ran, captured through a browser session.
pub struct RenderedHtmlSource {
    engine: Arc<dyn BrowserEngine>,
}

impl RenderedHtmlSource {
    pub fn new(engine: Arc<dyn BrowserEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl CollectionSource for RenderedHtmlSource {
    fn name(&self) -> &str {
        SourceKind::RenderedHtml.default_name()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::RenderedHtml
    }

    fn is_heavyweight(&self) -> bool {
        true
    }

    fn max_attempts(&self) -> u32 {
        2
    }

    async fn collect(&self, ctx: &SourceContext) -> Result<SourcePayload, SourceError> {
        let url = ctx.target.clone();

        let (content, final_url) =
            with_session(self.engine.as_ref(), ctx.config.viewport, &ctx.cancel, |session| {
                Box::pin(async move {
                    let navigation = session.navigate(&url).await?;
                    if navigation.status >= 400 {
                        return Err(SourceError::from(RemoteError::http(navigation.status)));
                    }
                    let content = session.html().await?;
                    Ok::<_, SourceError>((content, navigation.final_url))
                })
            })
            .await?;

        debug!(
            target = %ctx.target,
            bytes = content.len(),
            "Captured rendered HTML"
        );

        Ok(SourcePayload::Html {
            content,
            final_url: Some(final_url),
        })
    }
}
