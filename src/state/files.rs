//! This module contains the FileSeenSetStore struct.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use super::{QueryFingerprint, SeenSetStore, StateError};

/// The name of the state file in the configuration directory.
pub const STATE_FILE_NAME: &str = "state.json";
/// Only the owner can use the directory holding the state.
const DIR_MODE: u32 = 0o700;
/// Only the owner can read and write the state file.
const FILE_MODE: u32 = 0o600;

/// What is remembered about one query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SeenEntry {
    /// Every CVE identifier observed by the query so far.
    #[serde(rename = "seen_cve_ids", default)]
    pub seen_ids: BTreeSet<String>,
    /// When the last cycle was recorded.
    #[serde(
        rename = "last_run_utc",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Represents a seen-set store which keeps everything in one JSON file.
///
/// The file has the following structure:
/// {
///   "<fingerprint>": {
///     "seen_cve_ids": ["CVE-2024-0001", ...],
///     "last_run_utc": "2024-02-10T12:30:45.123456Z"
///   }
/// }
///
/// The whole file is read when the store is loaded, and rewritten after
/// each recorded cycle.
pub struct FileSeenSetStore {
    /// The state file.
    path: PathBuf,
    /// The entries, by fingerprint.
    entries: BTreeMap<String, SeenEntry>,
}

impl FileSeenSetStore {
    /// Loads the store from a file.
    ///
    /// A missing file is an empty store. So is a file that can't be read
    /// or parsed: the history is lost, but the watch can go on.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        trace!("Running FileSeenSetStore::load()");
        let path = path.into();
        let entries = if path.exists() {
            Self::read_document(&path).unwrap_or_else(|e| {
                warn!("{}, starting with an empty state", e);
                BTreeMap::new()
            })
        } else {
            debug!("No state file at {}", path.display());
            BTreeMap::new()
        };

        Self { path, entries }
    }

    /// Loads the store from the state file of the given directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self::load(dir.join(STATE_FILE_NAME))
    }

    /// The file the store is persisted in.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The number of queries known.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no query is known.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn read_document(path: &Path) -> Result<BTreeMap<String, SeenEntry>, StateError> {
        let corrupt = |reason: String| StateError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))
    }

    /// Writes the entries to a temporary file next to the state file, then
    /// renames it over the state file, so an interrupted write never leaves
    /// a truncated state behind.
    fn save(&self, entries: &BTreeMap<String, SeenEntry>) -> Result<(), StateError> {
        trace!("Running FileSeenSetStore::save()");
        let document = serde_json::to_string_pretty(entries)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|source| StateError::WriteFailed {
            path: dir.clone(),
            source,
        })?;
        restrict_permissions(&dir, DIR_MODE);

        let tmp_path = self.path.with_extension("json.tmp");
        let written = write_synced(&tmp_path, document.as_bytes()).and_then(|()| {
            restrict_permissions(&tmp_path, FILE_MODE);
            fs::rename(&tmp_path, &self.path)
        });
        if let Err(source) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(StateError::WriteFailed {
                path: self.path.clone(),
                source,
            });
        }

        debug!("State written to {}", self.path.display());
        Ok(())
    }
}

impl SeenSetStore for FileSeenSetStore {
    fn get_seen(&self, fingerprint: &QueryFingerprint) -> HashSet<String> {
        self.entries
            .get(fingerprint.as_str())
            .map(|entry| entry.seen_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn get_last_run(&self, fingerprint: &QueryFingerprint) -> Option<DateTime<Utc>> {
        self.entries
            .get(fingerprint.as_str())
            .and_then(|entry| entry.last_run_at)
    }

    fn record_cycle(
        &mut self,
        fingerprint: &QueryFingerprint,
        observed: &HashSet<String>,
    ) -> Result<(), StateError> {
        trace!("Running FileSeenSetStore::record_cycle()");
        let mut entries = self.entries.clone();
        let entry = entries.entry(fingerprint.as_str().to_string()).or_default();
        let before = entry.seen_ids.len();
        entry.seen_ids.extend(observed.iter().cloned());
        entry.last_run_at = Some(Utc::now());
        debug!(
            "{} new identifier(s) for {}, {} in total",
            entry.seen_ids.len() - before,
            fingerprint,
            entry.seen_ids.len()
        );

        self.save(&entries)?;
        self.entries = entries;
        Ok(())
    }
}

/// Creates the file, only readable by its owner where the platform allows
/// it, writes the data and waits for it to reach the disk.
fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Best-effort permission hardening: restricts `path` to `mode` where the
/// platform supports it. A failure is logged and otherwise ignored, it never
/// fails the write.
#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        debug!(
            "Unable to restrict the permissions of {}: {}",
            path.display(),
            e
        );
    }
}

/// Best-effort permission hardening: nothing to do on this platform.
#[cfg(not(unix))]
fn restrict_permissions(path: &Path, _mode: u32) {
    debug!("Permissions of {} left as they are", path.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "cvewatch_{}_{}",
            name,
            rand::random::<u64>()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn ids(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn fingerprint(name: &str) -> QueryFingerprint {
        QueryFingerprint::of(&crate::models::QueryConfig::new(name, 30, None, None))
    }

    #[test]
    fn fresh_store_is_empty() {
        let dir = temp_dir("fresh");
        let store = FileSeenSetStore::in_dir(&dir);
        assert!(store.is_empty());
        assert!(store.get_seen(&fingerprint("test")).is_empty());
        assert!(store.get_last_run(&fingerprint("test")).is_none());
        assert!(!store.path().exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn seen_ids_only_grow() {
        let dir = temp_dir("union");
        let fp = fingerprint("test");
        let mut store = FileSeenSetStore::in_dir(&dir);

        store.record_cycle(&fp, &ids(&["A", "B"])).unwrap();
        store.record_cycle(&fp, &ids(&["B", "C"])).unwrap();
        assert_eq!(store.get_seen(&fp), ids(&["A", "B", "C"]));

        store.record_cycle(&fp, &HashSet::new()).unwrap();
        assert_eq!(store.get_seen(&fp), ids(&["A", "B", "C"]));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn queries_are_kept_apart() {
        let dir = temp_dir("apart");
        let mut store = FileSeenSetStore::in_dir(&dir);
        store.record_cycle(&fingerprint("one"), &ids(&["A"])).unwrap();
        store.record_cycle(&fingerprint("two"), &ids(&["B"])).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get_seen(&fingerprint("one")), ids(&["A"]));
        assert_eq!(store.get_seen(&fingerprint("two")), ids(&["B"]));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn state_persists_across_loads() {
        let dir = temp_dir("persist");
        let fp = fingerprint("test");
        let before = Utc::now();
        {
            let mut store = FileSeenSetStore::in_dir(&dir);
            store
                .record_cycle(&fp, &ids(&["CVE-2024-0001", "CVE-2024-0002"]))
                .unwrap();
        }

        let store = FileSeenSetStore::in_dir(&dir);
        assert_eq!(store.get_seen(&fp), ids(&["CVE-2024-0001", "CVE-2024-0002"]));
        let last_run = store.get_last_run(&fp).unwrap();
        assert!(last_run >= before);
        assert!(last_run <= Utc::now());
        assert!(!dir.join("state.json.tmp").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn document_layout() {
        let dir = temp_dir("layout");
        let fp = fingerprint("test");
        let mut store = FileSeenSetStore::in_dir(&dir);
        store.record_cycle(&fp, &ids(&["CVE-2024-0001"])).unwrap();

        let content = fs::read_to_string(dir.join(STATE_FILE_NAME)).unwrap();
        let document: serde_json::Value = serde_json::from_str(&content).unwrap();
        let entry = &document[fp.as_str()];
        assert_eq!(entry["seen_cve_ids"], serde_json::json!(["CVE-2024-0001"]));
        assert!(entry["last_run_utc"].as_str().unwrap().ends_with('Z'));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn reads_timestamps_with_an_offset() {
        let dir = temp_dir("offset");
        fs::write(
            dir.join(STATE_FILE_NAME),
            r#"{"0123456789abcdef": {"seen_cve_ids": ["CVE-2023-1234"], "last_run_utc": "2024-02-10T12:30:45.123456+00:00"}}"#,
        )
        .unwrap();

        let store = FileSeenSetStore::in_dir(&dir);
        assert_eq!(store.len(), 1);
        let entry = &store.entries["0123456789abcdef"];
        assert!(entry.seen_ids.contains("CVE-2023-1234"));
        assert!(entry.last_run_at.is_some());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_file_is_an_empty_store() {
        let dir = temp_dir("malformed");
        let fp = fingerprint("test");
        fs::write(dir.join(STATE_FILE_NAME), "{ this is not json").unwrap();

        let mut store = FileSeenSetStore::in_dir(&dir);
        assert!(store.is_empty());
        assert!(store.get_seen(&fp).is_empty());

        store.record_cycle(&fp, &ids(&["A"])).unwrap();
        let reloaded = FileSeenSetStore::in_dir(&dir);
        assert_eq!(reloaded.get_seen(&fp), ids(&["A"]));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn unexpected_shape_is_an_empty_store() {
        let dir = temp_dir("shape");
        fs::write(dir.join(STATE_FILE_NAME), r#"["CVE-2024-0001"]"#).unwrap();
        assert!(FileSeenSetStore::in_dir(&dir).is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn creates_missing_directories() {
        let dir = temp_dir("nested");
        let path = dir.join("a").join("b").join(STATE_FILE_NAME);
        let mut store = FileSeenSetStore::load(&path);
        store.record_cycle(&fingerprint("test"), &ids(&["A"])).unwrap();
        assert!(path.exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn write_failure_is_reported_and_changes_nothing() {
        let dir = temp_dir("unwritable");
        let fp = fingerprint("test");
        // The parent of the state file is a regular file.
        let blocker = dir.join("blocker");
        fs::write(&blocker, "").unwrap();
        let mut store = FileSeenSetStore::load(blocker.join(STATE_FILE_NAME));

        let result = store.record_cycle(&fp, &ids(&["A"]));
        assert!(matches!(result, Err(StateError::WriteFailed { .. })));
        assert!(store.get_seen(&fp).is_empty());
        assert!(store.get_last_run(&fp).is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn new_files_are_created_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = temp_dir("private");
        let path = dir.join("state.json.tmp");
        write_synced(&path, b"{}").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        let _ = fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn permissions_are_restricted() {
        use std::os::unix::fs::PermissionsExt;

        let dir = temp_dir("perms");
        let state_dir = dir.join(".cvewatch");
        let mut store = FileSeenSetStore::in_dir(&state_dir);
        store.record_cycle(&fingerprint("test"), &ids(&["A"])).unwrap();

        let file_mode = fs::metadata(store.path()).unwrap().permissions().mode();
        let dir_mode = fs::metadata(&state_dir).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
        assert_eq!(dir_mode & 0o777, 0o700);
        let _ = fs::remove_dir_all(&dir);
    }
}
