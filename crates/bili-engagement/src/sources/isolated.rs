//! Isolated subtree source: the comment count.
//!
//! The comment header is rendered inside nested shadow roots, so ordinary
//! selector queries cannot reach it. Resolution runs script snippets through
//! the page's [`ScriptExecutor`] in a fixed order and the first step that
//! yields a numeral wins.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::json_count;
use crate::capability::ScriptExecutor;
use crate::normalize::leading_integer;
use crate::types::PartialRecord;

/// One step of the comment-count resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStep {
    /// Runtime copy of the embedded state.
    EmbeddedState,
    /// `bili-comments` → `bili-comments-header-renderer` → `#count`.
    ShadowHeader,
    /// Elements whose class or id mentions comment/reply.
    CommentMarkedElements,
    /// Any element mentioning comments next to a numeral.
    CommentWordScan,
}

impl ResolutionStep {
    pub const ORDER: [ResolutionStep; 4] = [
        ResolutionStep::EmbeddedState,
        ResolutionStep::ShadowHeader,
        ResolutionStep::CommentMarkedElements,
        ResolutionStep::CommentWordScan,
    ];

    /// Script expression evaluated for this step.
    pub fn snippet(self) -> &'static str {
        match self {
            ResolutionStep::EmbeddedState => EMBEDDED_STATE_JS,
            ResolutionStep::ShadowHeader => SHADOW_HEADER_JS,
            ResolutionStep::CommentMarkedElements => COMMENT_MARKED_JS,
            ResolutionStep::CommentWordScan => COMMENT_WORD_JS,
        }
    }
}

const EMBEDDED_STATE_JS: &str = r#"(() => {
  const s = window.__INITIAL_STATE__;
  if (s && s.videoData && s.videoData.stat) {
    return s.videoData.stat.reply ?? null;
  }
  return null;
})()"#;

const SHADOW_HEADER_JS: &str = r#"(() => {
  const host = document.querySelector('bili-comments');
  if (!host || !host.shadowRoot) return null;
  const header = host.shadowRoot.querySelector('bili-comments-header-renderer');
  if (!header || !header.shadowRoot) return null;
  const count = header.shadowRoot.querySelector('#count');
  return count ? count.textContent.trim() : null;
})()"#;

const COMMENT_MARKED_JS: &str = r#"(() => Array.from(
  document.querySelectorAll('[class*="comment"], [class*="reply"], [id*="comment"], [id*="reply"]')
).map(e => (e.textContent || '').trim()).filter(t => /\d/.test(t)).slice(0, 50))()"#;

const COMMENT_WORD_JS: &str = r#"(() => {
  for (const e of document.querySelectorAll('*')) {
    const t = (e.textContent || '').trim();
    if ((t.includes('评论') || /comment/i.test(t)) && /\d/.test(t)) return t;
  }
  return null;
})()"#;

/// Result of isolated-subtree extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolatedOutcome {
    pub record: PartialRecord,
    /// The step that produced the count, if any did.
    pub resolved_by: Option<ResolutionStep>,
}

/// Resolve the comment count through the script capability.
pub async fn extract_isolated(script: &dyn ScriptExecutor) -> IsolatedOutcome {
    for step in ResolutionStep::ORDER {
        match script.run(step.snippet()).await {
            Ok(value) => match numeral_of(&value) {
                Some(count) => {
                    debug!("comment count {count} resolved by {step:?}");
                    return IsolatedOutcome {
                        record: PartialRecord {
                            comment_count: Some(count),
                            ..Default::default()
                        },
                        resolved_by: Some(step),
                    };
                }
                None => debug!("{step:?} produced no numeral"),
            },
            Err(e) => debug!("{step:?} failed: {e}"),
        }
    }

    debug!("comment count unresolved in isolated subtrees");
    IsolatedOutcome::default()
}

/// Numbers as-is, strings by their leading numeral, arrays by the first
/// element that has one.
fn numeral_of(value: &Value) -> Option<u64> {
    match value {
        Value::Number(_) => json_count(value),
        Value::String(s) => leading_integer(s),
        Value::Array(items) => items.iter().find_map(numeral_of),
        _ => None,
    }
}
