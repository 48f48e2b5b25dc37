//! Merge partial records into one [`VideoRecord`].
//!
//! Priority is decided by source tag, never by arrival order:
//! - comment count: isolated subtree, then script state, then rendered markup
//! - every other field: script state, then rendered markup
//!
//! A value counts as present when it is non-zero (numbers), non-empty
//! (text) or set (timestamp). A source that reports exactly zero therefore
//! loses to a lower-priority source with a non-zero value.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::sources::{ExtractionSource, SourcedRecord};
use crate::types::{ContentId, PartialRecord, VideoRecord};

const COMMENT_PRIORITY: &[ExtractionSource] = &[
    ExtractionSource::IsolatedSubtree,
    ExtractionSource::ScriptState,
    ExtractionSource::RenderedMarkup,
];

const DEFAULT_PRIORITY: &[ExtractionSource] =
    &[ExtractionSource::ScriptState, ExtractionSource::RenderedMarkup];

/// Stateless merger of per-source partial records.
pub struct RecordReconciler;

impl RecordReconciler {
    /// Merge the three sources' records.
    pub fn merge(
        id: &ContentId,
        url: &str,
        script: &PartialRecord,
        rendered: &PartialRecord,
        shadow: &PartialRecord,
    ) -> VideoRecord {
        let records = [
            SourcedRecord::new(ExtractionSource::ScriptState, script.clone()),
            SourcedRecord::new(ExtractionSource::RenderedMarkup, rendered.clone()),
            SourcedRecord::new(ExtractionSource::IsolatedSubtree, shadow.clone()),
        ];
        Self::merge_sourced(id, url, &records)
    }

    /// Merge tagged records given in any order. When a tag appears twice the
    /// first occurrence is used.
    pub fn merge_sourced(id: &ContentId, url: &str, records: &[SourcedRecord]) -> VideoRecord {
        let picker = Picker { records };

        let record = VideoRecord {
            id: id.to_string(),
            url: url.to_string(),
            title: picker.text(DEFAULT_PRIORITY, |r| r.title.as_deref()),
            description: picker.text(DEFAULT_PRIORITY, |r| r.description.as_deref()),
            play_count: picker.count(DEFAULT_PRIORITY, |r| r.play_count),
            danmaku_count: picker.count(DEFAULT_PRIORITY, |r| r.danmaku_count),
            comment_count: picker.count(COMMENT_PRIORITY, |r| r.comment_count),
            favorite_count: picker.count(DEFAULT_PRIORITY, |r| r.favorite_count),
            coin_count: picker.count(DEFAULT_PRIORITY, |r| r.coin_count),
            share_count: picker.count(DEFAULT_PRIORITY, |r| r.share_count),
            like_count: picker.count(DEFAULT_PRIORITY, |r| r.like_count),
            publish_time: picker.time(DEFAULT_PRIORITY, |r| r.publish_time),
            owner_name: picker.text(DEFAULT_PRIORITY, |r| r.owner_name.as_deref()),
            owner_id: picker.count(DEFAULT_PRIORITY, |r| r.owner_id),
        };

        debug!(
            "merged {id}: comment_count={} from {} source record(s)",
            record.comment_count,
            records.len()
        );
        record
    }
}

struct Picker<'a> {
    records: &'a [SourcedRecord],
}

impl<'a> Picker<'a> {
    fn ranked(&self, priority: &'a [ExtractionSource]) -> impl Iterator<Item = &'a PartialRecord> + 'a {
        let records = self.records;
        priority.iter().filter_map(move |source| {
            records
                .iter()
                .find(|r| r.source == *source)
                .map(|r| &r.record)
        })
    }

    fn count(&self, priority: &'a [ExtractionSource], field: fn(&PartialRecord) -> Option<u64>) -> u64 {
        self.ranked(priority)
            .filter_map(field)
            .find(|v| *v != 0)
            .unwrap_or(0)
    }

    fn text(
        &self,
        priority: &'a [ExtractionSource],
        field: fn(&PartialRecord) -> Option<&str>,
    ) -> String {
        self.ranked(priority)
            .filter_map(field)
            .find(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_default()
    }

    fn time(
        &self,
        priority: &'a [ExtractionSource],
        field: fn(&PartialRecord) -> Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        self.ranked(priority).find_map(field)
    }
}
