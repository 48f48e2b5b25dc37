//! CLI subcommand implementations for the bili-harvest binary.

pub mod crawl_cmd;
pub mod discover_cmd;
pub mod probe_cmd;

use std::sync::Arc;

use anyhow::Result;

use bili_engagement::{Harvester, Transport};

use crate::config::RuntimeConfig;
use crate::http_client::HttpTransport;
use crate::renderer::build_renderer;

/// Wire the HTTP transport and the best available renderer into a harvester.
pub async fn build_harvester(config: &RuntimeConfig, no_browser: bool) -> Result<Harvester> {
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.http.timeout_ms)?);
    let renderer = build_renderer(&config.browser, transport.clone(), no_browser).await;
    Ok(Harvester::new(config.harvest.clone(), transport, renderer))
}
