//! Write the [`NormalizedRecord`]s as a table
//! It is the default writer, it presents the records in a text format
//! meant to be read in a terminal.

use std::io;

use super::Writer;
use crate::models::NormalizedRecord;

/// Descriptions longer than this are cut.
const DESCRIPTION_WIDTH: usize = 60;

/// A writer to print the records as a table.
pub struct TableWriter {}

impl TableWriter {
    /// Create a new TableWriter
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for TableWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer for TableWriter {
    /// Prints the records, one per line, and their count.
    fn write(&self, records: &[NormalizedRecord], output: &mut dyn io::Write) -> io::Result<()> {
        if records.is_empty() {
            return writeln!(output, "No CVEs found.");
        }

        let id_width = records
            .iter()
            .map(|r| r.id.chars().count())
            .chain([6])
            .max()
            .unwrap_or(6);
        let severity_width = records
            .iter()
            .map(|r| r.severity.name().len())
            .chain([8])
            .max()
            .unwrap_or(8);

        let header = format!(
            "{:<id_width$}  {:<severity_width$}  {:<4}  {:<10}  {}",
            "CVE ID", "Severity", "CVSS", "Published", "Description",
        );
        writeln!(output, "{}", header)?;
        writeln!(output, "{}", "-".repeat(header.chars().count()))?;

        for record in records {
            let score = record
                .score
                .map(|s| format!("{:.1}", s))
                .unwrap_or_else(|| "N/A".to_string());
            let published = record
                .published_at
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "N/A".to_string());
            let row = format!(
                "{:<id_width$}  {:<severity_width$}  {:<4}  {:<10}  {}",
                record.id,
                record.severity.name(),
                score,
                published,
                truncate(&record.description, DESCRIPTION_WIDTH),
            );
            writeln!(output, "{}", row.trim_end())?;
        }

        writeln!(output, "\nTotal: {} CVE(s)", records.len())
    }
}

/// Cuts the text to `width` characters, ending with "..." when cut.
fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}
