//! The three independent extraction sources.
//!
//! Each source turns one medium into a [`PartialRecord`]. Field extraction is
//! guarded per field: a field that cannot be read is left absent and the
//! remaining fields are still attempted.

pub mod isolated;
pub mod rendered;
pub mod script_state;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::normalize::normalize_count;
use crate::types::PartialRecord;

pub use isolated::{extract_isolated, IsolatedOutcome, ResolutionStep};
pub use rendered::extract_rendered;
pub use script_state::extract_script_state;

/// Which channel a partial record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    /// Embedded state blob assigned in a `<script>` block.
    ScriptState,
    /// Rendered markup queried by CSS selector.
    RenderedMarkup,
    /// Isolated shadow-DOM subtrees reached by script execution.
    IsolatedSubtree,
}

impl std::fmt::Display for ExtractionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScriptState => write!(f, "script-state"),
            Self::RenderedMarkup => write!(f, "rendered-markup"),
            Self::IsolatedSubtree => write!(f, "isolated-subtree"),
        }
    }
}

/// A partial record tagged with the source that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcedRecord {
    pub source: ExtractionSource,
    pub record: PartialRecord,
}

impl SourcedRecord {
    pub fn new(source: ExtractionSource, record: PartialRecord) -> Self {
        Self { source, record }
    }
}

/// Read a count from a JSON value: integers, non-negative floats, or
/// display strings run through the normalizer.
pub(crate) fn json_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) if !s.trim().is_empty() => Some(normalize_count(s)),
        _ => None,
    }
}

/// Read a string field, treating non-strings as absent.
pub(crate) fn json_text(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}
