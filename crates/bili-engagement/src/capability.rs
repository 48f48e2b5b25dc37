//! Collaborator capabilities the core consumes.
//!
//! Browser automation, HTTP transport and persistence live outside this
//! crate; the runtime supplies implementations of these traits.

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{FetchError, HarvestEntry, HarvestResult};

/// Ordered `(name, value)` pairs for query strings and headers.
pub type Pairs = [(String, String)];

/// HTTP transport. Every call is bounded by the implementation's timeout.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET a JSON document.
    async fn get_json(&self, url: &str, params: &Pairs, headers: &Pairs) -> Result<Value, FetchError>;

    /// GET a text document.
    async fn get_text(&self, url: &str, params: &Pairs, headers: &Pairs) -> Result<String, FetchError>;
}

/// Runs script snippets inside a rendered page.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Evaluate a JavaScript expression and return its value.
    async fn run(&self, snippet: &str) -> Result<Value, FetchError>;

    /// Release the page backing this executor.
    async fn close(self: Box<Self>) {}
}

/// A page snapshot plus the script capability of the live page.
pub struct RenderedPage {
    /// Serialized document after rendering settled.
    pub html: String,
    pub script: Box<dyn ScriptExecutor>,
}

impl std::fmt::Debug for RenderedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedPage")
            .field("html_len", &self.html.len())
            .finish_non_exhaustive()
    }
}

/// Browser automation collaborator.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedPage, FetchError>;
}

/// Script capability for pages obtained without a browser: every snippet fails.
pub struct NoScript;

#[async_trait]
impl ScriptExecutor for NoScript {
    async fn run(&self, _snippet: &str) -> Result<Value, FetchError> {
        Err(FetchError::SourceUnavailable(
            "script execution not available for this page".to_string(),
        ))
    }
}

/// Persistence collaborator; receives one entry per requested id.
pub trait ExportSink: Send {
    fn accept(&mut self, entry: &HarvestEntry) -> HarvestResult<()>;
}

/// Sink that keeps entries in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub entries: Vec<HarvestEntry>,
}

impl ExportSink for CollectingSink {
    fn accept(&mut self, entry: &HarvestEntry) -> HarvestResult<()> {
        self.entries.push(entry.clone());
        Ok(())
    }
}
