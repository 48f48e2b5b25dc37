//! The harvest orchestrator.
//!
//! Items are processed one at a time. For each id the page is rendered once,
//! the three extraction sources run concurrently and are merged, then the
//! auxiliary datasets are fetched over the transport. Item failures become
//! placeholder entries; only capability loss ends the batch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::api::{self, CommentResource};
use crate::capability::{ExportSink, PageRenderer, RenderedPage, Transport};
use crate::config::HarvestConfig;
use crate::fetcher::{FetchReport, PagedFetcher};
use crate::pacing::{Pacer, Sleeper, TokioSleeper};
use crate::reconcile::RecordReconciler;
use crate::sources::{
    extract_isolated, extract_rendered, extract_script_state, ExtractionSource, ResolutionStep,
    SourcedRecord,
};
use crate::types::{
    BatchSummary, CaptionEntry, ContentId, FetchError, HarvestEntry, HarvestError, HarvestRecord,
    HarvestResult, PartialRecord, VideoRecord,
};

/// Extraction-only view of one video: every source's partial record and the
/// merged result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub id: String,
    pub url: String,
    pub sources: Vec<SourcedRecord>,
    /// Which isolated-subtree step produced the comment count.
    pub resolved_by: Option<ResolutionStep>,
    pub merged: VideoRecord,
}

/// Sequential harvester over injected collaborators.
pub struct Harvester {
    config: HarvestConfig,
    transport: Arc<dyn Transport>,
    renderer: Arc<dyn PageRenderer>,
    pacer: Pacer,
}

impl Harvester {
    pub fn new(
        config: HarvestConfig,
        transport: Arc<dyn Transport>,
        renderer: Arc<dyn PageRenderer>,
    ) -> Self {
        Self::with_sleeper(config, transport, renderer, Arc::new(TokioSleeper))
    }

    /// Like [`Harvester::new`] with a custom sleeper for the pacing clock.
    pub fn with_sleeper(
        config: HarvestConfig,
        transport: Arc<dyn Transport>,
        renderer: Arc<dyn PageRenderer>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let pacer = Pacer::new(config.seed, config.user_agents.clone(), sleeper)
            .with_cookies(config.cookies.clone());
        Self {
            config,
            transport,
            renderer,
            pacer,
        }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Run only the extraction half for one id.
    pub async fn probe(&self, raw_id: &str) -> HarvestResult<ProbeReport> {
        let id = ContentId::parse(raw_id)?;
        self.extract(&id).await.map_err(render_failure)
    }

    /// Harvest every id in order, handing one entry per id to `sink`.
    pub async fn harvest_batch(
        &mut self,
        ids: &[String],
        sink: &mut dyn ExportSink,
    ) -> HarvestResult<BatchSummary> {
        let mut summary = BatchSummary::default();
        let total = ids.len();

        for (index, raw) in ids.iter().enumerate() {
            info!("[{}/{total}] harvesting {raw}", index + 1);

            let id = match ContentId::parse(raw) {
                Ok(id) => id,
                Err(e) => {
                    warn!("{e}");
                    summary.failed += 1;
                    sink.accept(&failed_entry(raw.trim(), &e))?;
                    continue;
                }
            };

            let entry = match self.harvest_item(&id).await {
                Ok(record) => {
                    summary.harvested += 1;
                    HarvestEntry::Harvested(record)
                }
                Err(HarvestError::CapabilityLost(reason)) => {
                    error!("capability lost while harvesting {id}, stopping batch: {reason}");
                    return Err(HarvestError::CapabilityLost(reason));
                }
                Err(e) => {
                    warn!("{id} failed: {e}");
                    summary.failed += 1;
                    failed_entry(id.as_str(), &e)
                }
            };
            sink.accept(&entry)?;

            if index + 1 < total {
                let delay = self.pacer.pause(self.config.item_delay).await;
                debug!("paused {}ms before next item", delay.as_millis());
            }
        }

        info!(
            "batch finished: {} harvested, {} failed",
            summary.harvested, summary.failed
        );
        Ok(summary)
    }

    /// Harvest one video: extraction, then metadata, stats, comments and
    /// captions. Auxiliary failures leave their part empty.
    pub async fn harvest_item(&mut self, id: &ContentId) -> HarvestResult<HarvestRecord> {
        let extraction = self.extract(id).await.map_err(render_failure)?;

        let transport = Arc::clone(&self.transport);
        let fetcher = PagedFetcher::new(transport.as_ref(), self.config.fetch_policy());
        let api_base = self.config.api_base.clone();
        let pacer = &mut self.pacer;

        let meta = fetcher
            .fetch_json("metadata", &api::meta_request(&api_base, id), pacer, api::parse_meta)
            .await?;
        let stats = fetcher
            .fetch_json("stats", &api::stats_request(&api_base, id), pacer, api::parse_stats)
            .await?;

        let aid = meta.as_ref().map(|m| m.aid).or_else(|| id.aid());
        let (comments, comment_fetch) = match aid {
            Some(aid) => {
                let resource = CommentResource::new(
                    &api_base,
                    id.clone(),
                    aid,
                    self.config.comment_page_size,
                );
                let outcome = fetcher.run(&resource, pacer).await?;
                (outcome.items, outcome.report)
            }
            None => {
                warn!("{id}: no archive id, skipping comments");
                (Vec::new(), FetchReport::not_attempted())
            }
        };

        let captions = fetch_captions(&fetcher, &api_base, id, pacer).await?;

        info!(
            "{id}: {} comment(s), {} caption(s), comment fetch {:?}",
            comments.len(),
            captions.len(),
            comment_fetch.status
        );

        Ok(HarvestRecord {
            video: extraction.merged,
            comments,
            captions,
            meta,
            stats,
            comment_fetch,
        })
    }

    async fn extract(&self, id: &ContentId) -> Result<ProbeReport, FetchError> {
        let url = id.url(&self.config.video_base);
        let RenderedPage { html, script } = self.renderer.render(&url).await?;

        let html = Arc::new(html);
        let state_html = Arc::clone(&html);
        let markup_html = html;

        let (script_state, rendered, isolated) = tokio::join!(
            tokio::task::spawn_blocking(move || extract_script_state(&state_html)),
            tokio::task::spawn_blocking(move || extract_rendered(&markup_html)),
            extract_isolated(script.as_ref()),
        );
        script.close().await;

        let sources = vec![
            SourcedRecord::new(
                ExtractionSource::ScriptState,
                joined(ExtractionSource::ScriptState, script_state),
            ),
            SourcedRecord::new(
                ExtractionSource::RenderedMarkup,
                joined(ExtractionSource::RenderedMarkup, rendered),
            ),
            SourcedRecord::new(ExtractionSource::IsolatedSubtree, isolated.record),
        ];
        for sourced in &sources {
            debug!(
                "{id}: {} reported {} field(s)",
                sourced.source,
                sourced.record.populated()
            );
        }

        let merged = RecordReconciler::merge_sourced(id, &url, &sources);
        Ok(ProbeReport {
            id: id.to_string(),
            url,
            sources,
            resolved_by: isolated.resolved_by,
            merged,
        })
    }
}

async fn fetch_captions(
    fetcher: &PagedFetcher<'_>,
    api_base: &str,
    id: &ContentId,
    pacer: &mut Pacer,
) -> HarvestResult<Vec<CaptionEntry>> {
    let cid = fetcher
        .fetch_json("page list", &api::pagelist_request(api_base, id), pacer, api::parse_first_cid)
        .await?;
    let Some(cid) = cid else {
        return Ok(Vec::new());
    };

    let captions = fetcher
        .fetch_text("captions", &api::captions_request(api_base, cid), pacer, |xml| {
            api::parse_captions(&xml)
        })
        .await?;
    Ok(captions.unwrap_or_default())
}

/// A source task that panicked contributes nothing.
fn joined(
    source: ExtractionSource,
    result: Result<PartialRecord, tokio::task::JoinError>,
) -> PartialRecord {
    result.unwrap_or_else(|e| {
        warn!("{source} extraction task failed: {e}");
        PartialRecord::default()
    })
}

fn render_failure(e: FetchError) -> HarvestError {
    if e.is_capability_loss() {
        HarvestError::CapabilityLost(e.to_string())
    } else {
        HarvestError::Render(e)
    }
}

fn failed_entry(id: &str, error: &HarvestError) -> HarvestEntry {
    HarvestEntry::Failed {
        id: id.to_string(),
        error: error.to_string(),
    }
}
