//! `bili-harvest probe <id>`: show what each extraction source sees.

use anyhow::{Context, Result};

use crate::config::RuntimeConfig;

/// Run the probe command.
pub async fn run(config: &RuntimeConfig, id: &str, no_browser: bool) -> Result<()> {
    let harvester = super::build_harvester(config, no_browser).await?;
    let report = harvester.probe(id).await?;

    let json = serde_json::to_string_pretty(&report).context("failed to serialize probe report")?;
    println!("{json}");
    Ok(())
}
