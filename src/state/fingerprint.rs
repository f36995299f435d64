//! The key under which the state of a query is stored.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::models::QueryConfig;

/// How many hexadecimal characters of the digest are kept.
const FINGERPRINT_LEN: usize = 16;

/// A stable digest of a [`QueryConfig`].
///
/// Two queries with the same values give the same fingerprint, whatever
/// the order the severities were given in. It identifies a query, it's not
/// meant to protect anything.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    /// Computes the fingerprint of a query.
    ///
    /// The digest covers `keyword|days|min_score|severities`, where the
    /// severities are sorted before being joined.
    pub fn of(query: &QueryConfig) -> Self {
        let min_score = query
            .min_score
            .map(|score| format!("{:?}", score))
            .unwrap_or_default();
        let mut severities: Vec<&str> = query
            .severities
            .iter()
            .flatten()
            .map(|severity| severity.key())
            .collect();
        severities.sort_unstable();

        let data = [
            query.keyword.clone(),
            query.window_days.to_string(),
            min_score,
            severities.join(","),
        ]
        .join("|");

        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self(digest[..FINGERPRINT_LEN].to_string())
    }

    /// The fingerprint as written in the state file.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
