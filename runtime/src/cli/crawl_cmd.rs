//! `bili-harvest crawl <ids>...`: harvest videos into JSON lines on stdout.

use std::io::{self, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use bili_engagement::ContentId;

use crate::config::RuntimeConfig;
use crate::export::JsonLinesSink;

/// Run the crawl command.
pub async fn run(
    config: &RuntimeConfig,
    ids: &[String],
    ids_file: Option<&Path>,
    no_browser: bool,
) -> Result<()> {
    let mut targets = normalize_ids(ids.iter().map(String::as_str));
    if let Some(path) = ids_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ids file: {}", path.display()))?;
        targets.extend(normalize_ids(content.lines()));
    }
    if targets.is_empty() {
        anyhow::bail!("no video ids given; pass ids or --ids-file");
    }

    let mut harvester = super::build_harvester(config, no_browser).await?;
    let mut sink = JsonLinesSink::new(BufWriter::new(io::stdout()));

    let summary = harvester.harvest_batch(&targets, &mut sink).await?;
    info!(
        "wrote {} entries ({} harvested, {} failed)",
        sink.written(),
        summary.harvested,
        summary.failed
    );
    Ok(())
}

/// Accept bare ids or video URLs, one per entry. Blank and `#` lines are
/// skipped; anything without a recognizable id is passed through so the
/// batch can report it as failed.
fn normalize_ids<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    raw.into_iter()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match ContentId::find_in(line) {
            Some(id) => id.as_str().to_string(),
            None => line.to_string(),
        })
        .collect()
}
