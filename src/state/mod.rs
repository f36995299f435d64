//! The state kept between two watch cycles.
//!
//! For each query ever watched, identified by its [`QueryFingerprint`], the
//! store remembers every CVE already reported and when the last cycle ran.
//! It is what makes a watch report only the new CVEs.

pub mod files;
pub mod fingerprint;

pub use fingerprint::QueryFingerprint;

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A common interface between all seen-set stores.
pub trait SeenSetStore {
    /// The identifiers already seen for the query, empty if the query has
    /// never been watched.
    fn get_seen(&self, fingerprint: &QueryFingerprint) -> HashSet<String>;

    /// When the last cycle of the query was recorded.
    fn get_last_run(&self, fingerprint: &QueryFingerprint) -> Option<DateTime<Utc>>;

    /// Adds every identifier observed during a cycle to the seen ones,
    /// stamps the run and persists the store.
    ///
    /// Identifiers are never removed. If the store can't be persisted,
    /// nothing changes and the error is returned.
    fn record_cycle(
        &mut self,
        fingerprint: &QueryFingerprint,
        observed: &HashSet<String>,
    ) -> Result<(), StateError>;
}

/// The ways reading or writing the state can fail.
#[derive(Debug, Error)]
pub enum StateError {
    /// The state file exists but can't be used. Loading recovers from it
    /// by starting with an empty state.
    #[error("the state file {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
    /// The state couldn't be written, the cycle must not be reported.
    #[error("unable to write the state file {}: {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The state couldn't be serialized.
    #[error("unable to serialize the state: {0}")]
    Serialize(#[from] serde_json::Error),
}
