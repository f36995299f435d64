//! The flat shape every CVE is turned into after being fetched.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Severity;

/// Represents a CVE, simplified from the NVD response.
///
/// The serialized names are the ones written in NDJSON output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NormalizedRecord {
    /// The CVE identifier.
    /// Example: CVE-2012-6708
    #[serde(rename = "cve_id")]
    pub id: String,
    /// When the CVE was published.
    #[serde(rename = "published")]
    pub published_at: Option<DateTime<Utc>>,
    /// When the CVE was last modified.
    #[serde(rename = "last_modified")]
    pub last_modified_at: Option<DateTime<Utc>>,
    /// The description, on a single line.
    pub description: String,
    /// The CVSS base score, from the most recent CVSS version available.
    #[serde(rename = "cvss_score")]
    pub score: Option<f64>,
    /// The severity derived from the score.
    pub severity: Severity,
    /// The reference URLs, in the order given by the NVD.
    #[serde(rename = "references")]
    pub reference_urls: Vec<String>,
}

impl NormalizedRecord {
    /// Creates a record with only an identifier.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            published_at: None,
            last_modified_at: None,
            description: String::new(),
            score: None,
            severity: Severity::Unknown,
            reference_urls: Vec::new(),
        }
    }
}
