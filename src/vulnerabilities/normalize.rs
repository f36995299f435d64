//! Turns the CVEs returned by the NVD into [`NormalizedRecord`]s, and
//! decides which of them are kept.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::models::{NormalizedRecord, Severity};
use crate::vulnerabilities::fetchers::nvd::{CVEDescription, CVEMetrics, Vulnerability};

/// The identifier used when the NVD doesn't give one.
const UNKNOWN_ID: &str = "UNKNOWN";

/// Builds the record of a vulnerability, extracting what is available.
pub fn normalize(vulnerability: &Vulnerability) -> NormalizedRecord {
    let cve = &vulnerability.cve;
    let score = extract_score(&cve.metrics);

    NormalizedRecord {
        id: cve.id.clone().unwrap_or_else(|| UNKNOWN_ID.to_string()),
        published_at: parse_timestamp(cve.published.as_deref()),
        last_modified_at: parse_timestamp(cve.last_modified.as_deref()),
        description: extract_description(&cve.descriptions),
        score,
        severity: Severity::from_score(score),
        reference_urls: cve
            .references
            .iter()
            .filter_map(|r| r.url.clone())
            .filter(|url| !url.is_empty())
            .collect(),
    }
}

/// Checks if a record passes the filters.
///
/// With a minimum score, records without a score are rejected. An empty
/// set of severities doesn't filter anything.
pub fn passes_filter(
    record: &NormalizedRecord,
    min_score: Option<f64>,
    severities: Option<&BTreeSet<Severity>>,
) -> bool {
    if let Some(min) = min_score {
        match record.score {
            Some(score) if score >= min => {}
            _ => return false,
        }
    }

    match severities {
        Some(wanted) if !wanted.is_empty() => wanted.contains(&record.severity),
        _ => true,
    }
}

/// The base score of the most recent CVSS version: 3.1, then 3.0, then 2.
fn extract_score(metrics: &CVEMetrics) -> Option<f64> {
    [
        &metrics.cvss_metric_v31,
        &metrics.cvss_metric_v30,
        &metrics.cvss_metric_v2,
    ]
    .into_iter()
    .find_map(|versions| versions.first())
    .and_then(|metric| metric.cvss_data.base_score)
}

/// The English description, or the first one, on a single line.
fn extract_description(descriptions: &[CVEDescription]) -> String {
    descriptions
        .iter()
        .find(|d| d.lang == "en")
        .or_else(|| descriptions.first())
        .map(|d| d.value.replace('\n', " ").trim().to_string())
        .unwrap_or_default()
}

/// Parses the NVD timestamps, which have no timezone and are in UTC.
/// Example: 2018-01-18T23:29:00.213
fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(value) {
        return Some(with_offset.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
