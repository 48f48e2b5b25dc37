//! Page renderers: headless Chromium, or plain HTTP when no browser is
//! available.

pub mod chromium;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use bili_engagement::pacing::DEFAULT_USER_AGENTS;
use bili_engagement::{FetchError, NoScript, PageRenderer, RenderedPage, Transport};

use crate::config::BrowserSettings;
use chromium::ChromiumRenderer;

/// Renderer that downloads the raw page over HTTP.
///
/// The embedded state and server-rendered markup are still available; the
/// isolated subtrees are not, so the comment count falls back to the other
/// sources.
pub struct HttpOnlyRenderer {
    transport: Arc<dyn Transport>,
}

impl HttpOnlyRenderer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl PageRenderer for HttpOnlyRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage, FetchError> {
        let headers = [
            ("User-Agent".to_string(), DEFAULT_USER_AGENTS[0].to_string()),
            (
                "Accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            ),
            ("Accept-Language".to_string(), "zh-CN,zh;q=0.9,en;q=0.8".to_string()),
        ];
        let html = self.transport.get_text(url, &[], &headers).await?;
        Ok(RenderedPage {
            html,
            script: Box::new(NoScript),
        })
    }
}

/// Pick a renderer: Chromium unless disabled, with HTTP-only as the fallback
/// when the browser cannot be launched.
pub async fn build_renderer(
    settings: &BrowserSettings,
    transport: Arc<dyn Transport>,
    no_browser: bool,
) -> Arc<dyn PageRenderer> {
    if no_browser || !settings.enabled {
        info!("browser disabled, rendering pages over HTTP only");
        return Arc::new(HttpOnlyRenderer::new(transport));
    }

    match ChromiumRenderer::launch(settings).await {
        Ok(renderer) => {
            info!("rendering pages with headless Chromium");
            Arc::new(renderer)
        }
        Err(e) => {
            warn!("Chromium unavailable ({e:#}), rendering pages over HTTP only");
            Arc::new(HttpOnlyRenderer::new(transport))
        }
    }
}
