//! The query a user searches or watches for.

use std::collections::BTreeSet;

use super::{NormalizedRecord, Severity};
use crate::vulnerabilities::normalize::passes_filter;

/// Represents one search against the NVD, with its client-side filters.
///
/// It's built once from the command line and stays the same for the whole
/// run, every watch cycle uses the same query.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryConfig {
    /// The keyword sent to the NVD.
    /// Example: openssl
    pub keyword: String,
    /// How many days to look back from now.
    pub window_days: u32,
    /// The minimum CVSS score a record must have.
    pub min_score: Option<f64>,
    /// The severities a record must have one of.
    /// An empty set is the same as no filter.
    pub severities: Option<BTreeSet<Severity>>,
}

impl QueryConfig {
    /// Creates a new QueryConfig
    pub fn new(
        keyword: &str,
        window_days: u32,
        min_score: Option<f64>,
        severities: Option<&[Severity]>,
    ) -> Self {
        Self {
            keyword: keyword.to_string(),
            window_days,
            min_score,
            severities: severities.map(|s| s.iter().copied().collect()),
        }
    }

    /// Whether the record passes the filters of this query.
    pub fn accepts(&self, record: &NormalizedRecord) -> bool {
        passes_filter(record, self.min_score, self.severities.as_ref())
    }
}
