//! bili-engagement: multi-source engagement extraction, reconciliation, and
//! paginated retrieval with retry for Bilibili videos.

pub mod api;
pub mod capability;
pub mod config;
pub mod discovery;
pub mod fetcher;
pub mod harvest;
pub mod normalize;
pub mod pacing;
pub mod reconcile;
pub mod sources;
pub mod types;

pub use capability::{
    CollectingSink, ExportSink, NoScript, PageRenderer, Pairs, RenderedPage, ScriptExecutor,
    Transport,
};
pub use config::HarvestConfig;
pub use discovery::{discover_ids, RANKING_URL};
pub use fetcher::{
    FetchOutcome, FetchPolicy, FetchReport, FetchState, FetchStatus, PageBody, PageProgress,
    PageRequest, PagedFetcher, PagedResource,
};
pub use harvest::{Harvester, ProbeReport};
pub use normalize::normalize_count;
pub use pacing::{DelayRange, Pacer, Sleeper, TokioSleeper};
pub use reconcile::RecordReconciler;
pub use sources::{ExtractionSource, ResolutionStep, SourcedRecord};
pub use types::*;
