//! JSON-lines export: one serialized entry per line.

use std::io::Write;

use bili_engagement::{ExportSink, HarvestEntry, HarvestError, HarvestResult};

/// Writes each entry as a single JSON line and flushes it immediately, so a
/// crash mid-batch keeps every finished item.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    written: usize,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Entries written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ExportSink for JsonLinesSink<W> {
    fn accept(&mut self, entry: &HarvestEntry) -> HarvestResult<()> {
        serde_json::to_writer(&mut self.writer, entry)
            .map_err(|e| HarvestError::Export(format!("failed to write {}: {e}", entry.id())))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }
}
