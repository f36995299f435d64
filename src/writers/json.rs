//! Write the [`NormalizedRecord`]s as NDJSON
//! Each record is printed as a JSON object on its own line, which makes the
//! output easy to pipe into other tools.

use std::io;

use super::Writer;
use crate::models::NormalizedRecord;

/// A writer to print the records as newline-delimited JSON.
pub struct NdjsonWriter {}

impl NdjsonWriter {
    /// Create a new NdjsonWriter
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for NdjsonWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer for NdjsonWriter {
    /// Writes the records
    fn write(&self, records: &[NormalizedRecord], output: &mut dyn io::Write) -> io::Result<()> {
        for record in records {
            serde_json::to_writer(&mut *output, record)?;
            writeln!(output)?;
        }
        Ok(())
    }
}
