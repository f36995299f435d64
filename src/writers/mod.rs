//! Writing the records
//!
//! After a search or a watch cycle, it's up to a writer to present the
//! [`NormalizedRecord`]s. It provides a common interface, so the way the
//! records are found doesn't depend on how they are shown.

pub mod csv;
pub mod json;
pub mod table;

use std::io;

use crate::models::NormalizedRecord;

/// A trait to have a common interface between writers.
pub trait Writer {
    /// Writes the records to `output`.
    fn write(&self, records: &[NormalizedRecord], output: &mut dyn io::Write) -> io::Result<()>;
}

/// The output formats available.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OutputFormat {
    /// A table for humans, the default.
    Table,
    /// Comma-separated values, with a header line.
    Csv,
    /// One JSON object per line.
    Ndjson,
}

impl OutputFormat {
    /// Creates the writer of this format.
    pub fn writer(&self) -> Box<dyn Writer> {
        match self {
            OutputFormat::Table => Box::new(table::TableWriter::new()),
            OutputFormat::Csv => Box::new(csv::CsvWriter::new()),
            OutputFormat::Ndjson => Box::new(json::NdjsonWriter::new()),
        }
    }
}
