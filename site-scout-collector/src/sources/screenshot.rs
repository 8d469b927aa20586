use async_trait::async_trait;
use site_scout_core::{CollectorConfig, ScreenshotCapture, SourceKind, SourcePayload};
use site_scout_resilience::RemoteError;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

use super::{with_session, BrowserEngine, CollectionSource, SourceContext, SourceError};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// PNG capture of the viewport or of the whole document.
pub struct ScreenshotSource {
    engine: Arc<dyn BrowserEngine>,
    full_page: bool,
}

impl ScreenshotSource {
    pub fn above_fold(engine: Arc<dyn BrowserEngine>) -> Self {
        Self {
            engine,
            full_page: false,
        }
    }

    pub fn full_page(engine: Arc<dyn BrowserEngine>) -> Self {
        Self {
            engine,
            full_page: true,
        }
    }

    pub fn output_path(&self, ctx: &SourceContext) -> PathBuf {
        ctx.config
            .output_directory
            .join(format!("{}-{}.png", ctx.run_id, self.kind().default_name()))
    }
}

#[async_trait]
impl CollectionSource for ScreenshotSource {
    fn name(&self) -> &str {
        self.kind().default_name()
    }

    fn kind(&self) -> SourceKind {
        if self.full_page {
            SourceKind::FullPageScreenshot
        } else {
            SourceKind::AboveFoldScreenshot
        }
    }

    fn is_heavyweight(&self) -> bool {
        true
    }

    fn max_attempts(&self) -> u32 {
        2
    }

    fn enabled(&self, config: &CollectorConfig) -> bool {
        !self.full_page || config.capture_full_page
    }

    async fn collect(&self, ctx: &SourceContext) -> Result<SourcePayload, SourceError> {
        let url = ctx.target.clone();
        let full_page = self.full_page;

        let png = with_session(self.engine.as_ref(), ctx.config.viewport, &ctx.cancel, |session| {
            Box::pin(async move {
                let navigation = session.navigate(&url).await?;
                if navigation.status >= 400 {
                    return Err(SourceError::from(RemoteError::http(navigation.status)));
                }
                session.screenshot(full_page).await
            })
        })
        .await?;

        let path = self.output_path(ctx);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &png).await?;

        let viewport = ctx.config.viewport;
        let (width, height) = png_dimensions(&png).unwrap_or((viewport.width, viewport.height));

        debug!(
            path = %path.display(),
            bytes = png.len(),
            full_page,
            "Screenshot written"
        );

        Ok(SourcePayload::Screenshot(ScreenshotCapture {
            path,
            bytes: png.len() as u64,
            width,
            height,
            full_page,
        }))
    }
}

/// Width and height from a PNG's IHDR chunk.
pub fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 24 || bytes[..8] != PNG_SIGNATURE || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
    Some((width, height))
}
