//! `bili-harvest discover`: list video ids linked from a ranking page.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use bili_engagement::{discover_ids, Transport};

use crate::config::RuntimeConfig;
use crate::http_client::HttpTransport;
use crate::renderer::build_renderer;

/// Run the discover command, printing one id per line.
pub async fn run(config: &RuntimeConfig, url: &str, no_browser: bool) -> Result<()> {
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.http.timeout_ms)?);
    let renderer = build_renderer(&config.browser, transport, no_browser).await;

    let page = renderer.render(url).await?;
    let ids = discover_ids(&page.html);
    page.script.close().await;

    info!("found {} video ids on {url}", ids.len());
    for id in ids {
        println!("{id}");
    }
    Ok(())
}
