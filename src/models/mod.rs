//! In this module are declared the entities manipulated by this program

pub mod query;
pub mod record;

pub use query::QueryConfig;
pub use record::NormalizedRecord;

use std::fmt;

use clap::{builder::PossibleValue, ValueEnum};
use serde::Serialize;

/// Represents the severity of a CVE, derived from its CVSS base score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    /// Score of 9.0 and above
    Critical,
    /// Score from 7.0 to 8.9
    High,
    /// Score from 4.0 to 6.9
    Medium,
    /// Score from 0.1 to 3.9
    Low,
    /// No score, or a score of 0.0
    Unknown,
}

impl Severity {
    /// Maps a CVSS base score to a severity.
    pub fn from_score(score: Option<f64>) -> Self {
        match score {
            Some(s) if s >= 9.0 => Severity::Critical,
            Some(s) if s >= 7.0 => Severity::High,
            Some(s) if s >= 4.0 => Severity::Medium,
            Some(s) if s >= 0.1 => Severity::Low,
            _ => Severity::Unknown,
        }
    }

    /// The name displayed to the user.
    /// Example: Critical
    pub fn name(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
            Severity::Unknown => "Unknown",
        }
    }

    /// The lower-case name, as accepted on the command line.
    /// Example: critical
    pub fn key(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ValueEnum for Severity {
    /// Lists the variants available for clap.
    /// Unknown can't be asked for, it's only the result of a missing score.
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
        ]
    }

    /// Map each value to a possible value in clap
    fn to_possible_value(&self) -> Option<PossibleValue> {
        match &self {
            Severity::Unknown => None,
            other => Some(PossibleValue::new(other.key())),
        }
    }
}
