//! Runs the searches, and the watch cycles which report only the CVEs
//! not seen before.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use futures::{future, TryStreamExt};
use log::{debug, info, trace};
use thiserror::Error;

use crate::models::{NormalizedRecord, QueryConfig};
use crate::state::{QueryFingerprint, SeenSetStore, StateError};
use crate::vulnerabilities::fetchers::nvd::NVDFetcher;
use crate::vulnerabilities::fetchers::{FetchError, Transport};
use crate::vulnerabilities::normalize::normalize;

/// The ways a watch cycle can fail. Either way nothing must be reported.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    State(#[from] StateError),
}

/// What a watch cycle found.
#[derive(Debug)]
pub struct CycleReport {
    /// The records not seen by any previous cycle, in the order returned
    /// by the NVD.
    pub new_records: Vec<NormalizedRecord>,
    /// How many distinct records matched the query during this cycle.
    pub observed: usize,
}

/// The identifiers observed that weren't seen before.
pub fn new_ids(observed: &HashSet<String>, seen: &HashSet<String>) -> HashSet<String> {
    observed.difference(seen).cloned().collect()
}

/// Fetches every CVE of the query, and keeps the normalized records
/// passing its filters.
pub async fn search<T: Transport>(
    fetcher: &NVDFetcher<T>,
    query: &QueryConfig,
    now: DateTime<Utc>,
) -> Result<Vec<NormalizedRecord>, FetchError> {
    trace!("Running watcher::search()");
    let records: Vec<NormalizedRecord> = fetcher
        .search(query, now)
        .into_stream()
        .map_ok(|vulnerability| normalize(&vulnerability))
        .try_filter(|record| future::ready(query.accepts(record)))
        .try_collect()
        .await?;
    info!("{} record(s) match the query", records.len());
    Ok(records)
}

/// Runs one watch cycle.
///
/// Every identifier observed is recorded in the store before the new
/// records are returned: if the state can't be written, the cycle fails
/// and nothing is reported, so nothing is reported twice.
pub async fn run_cycle<T: Transport, S: SeenSetStore>(
    fetcher: &NVDFetcher<T>,
    store: &mut S,
    query: &QueryConfig,
    fingerprint: &QueryFingerprint,
    now: DateTime<Utc>,
) -> Result<CycleReport, WatchError> {
    trace!("Running watcher::run_cycle()");
    let seen = store.get_seen(fingerprint);
    debug!("{} identifier(s) already seen for {}", seen.len(), fingerprint);

    let mut observed = HashSet::new();
    let records: Vec<NormalizedRecord> = search(fetcher, query, now)
        .await?
        .into_iter()
        .filter(|record| observed.insert(record.id.clone()))
        .collect();

    let fresh = new_ids(&observed, &seen);
    store.record_cycle(fingerprint, &observed)?;

    let new_records: Vec<NormalizedRecord> = records
        .into_iter()
        .filter(|record| fresh.contains(&record.id))
        .collect();
    info!(
        "{} new record(s) out of {} observed",
        new_records.len(),
        observed.len()
    );

    Ok(CycleReport {
        new_records,
        observed: observed.len(),
    })
}
