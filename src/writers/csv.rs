//! Write the [`NormalizedRecord`]s as CSV
//! It presents the records in a CSV format, every field quoted.

use std::io;

use super::Writer;
use crate::models::NormalizedRecord;

/// The columns, in order.
const HEADER: [&str; 7] = [
    "cve_id",
    "severity",
    "cvss_score",
    "published",
    "last_modified",
    "description",
    "references",
];

/// A writer to print the records as CSV.
pub struct CsvWriter {}

impl CsvWriter {
    /// Create a new CsvWriter
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for CsvWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer for CsvWriter {
    /// Writes the header and one line per record. Nothing at all when
    /// there is no record.
    fn write(&self, records: &[NormalizedRecord], output: &mut dyn io::Write) -> io::Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        writeln!(output, "{}", csv_line(&HEADER))?;
        for record in records {
            let score = record.score.map(|s| format!("{:.1}", s)).unwrap_or_default();
            let published = record
                .published_at
                .map(|d| d.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
                .unwrap_or_default();
            let last_modified = record
                .last_modified_at
                .map(|d| d.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
                .unwrap_or_default();
            let references = record.reference_urls.join("; ");

            writeln!(
                output,
                "{}",
                csv_line(&[
                    &record.id,
                    record.severity.name(),
                    &score,
                    &published,
                    &last_modified,
                    &record.description,
                    &references,
                ])
            )?;
        }
        Ok(())
    }
}

/// Quotes every field, escaping quotes (") to avoid breaking the CSV.
fn csv_line(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|field| format!("\"{}\"", field.replace('"', "\"\"")))
        .collect::<Vec<String>>()
        .join(",")
}
