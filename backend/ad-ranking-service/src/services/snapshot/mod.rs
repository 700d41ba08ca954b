// ============================================
// Reference-Data Snapshot Store
// ============================================
//
// Hot-reloadable, immutable reference tables shared by every request.
//
// Data Flow:
// 1. Startup: file is read and decoded; failure aborts startup
// 2. A watcher task polls the file and hashes its bytes on every tick
// 3. Changed content is decoded into a fresh table
// 4. Success: the new Arc is swapped in; failure: last-good table stays
//
// Readers call `current()` once per request and keep the Arc for the rest
// of the request. The watcher is the only writer.

use arc_swap::ArcSwap;
use prost::Message;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SnapshotConfig;
use crate::metrics::{self, ErrorSite};
use crate::models::{AdCounterTable, AdInfoTable};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {table} snapshot: {source}")]
    Decode {
        table: &'static str,
        #[source]
        source: prost::DecodeError,
    },
}

/// A protobuf table that can be published as a snapshot.
pub trait SnapshotTable: Message + Default + Send + Sync + 'static {
    const TABLE: &'static str;
    const READ_ERROR_SITE: ErrorSite;
    const PARSE_ERROR_SITE: ErrorSite;

    fn version(&self) -> u64;
    fn entry_count(&self) -> usize;

    fn decode_snapshot(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Self::decode(bytes).map_err(|source| SnapshotError::Decode {
            table: Self::TABLE,
            source,
        })
    }
}

impl SnapshotTable for AdInfoTable {
    const TABLE: &'static str = "ad_info";
    const READ_ERROR_SITE: ErrorSite = ErrorSite::AdInfoRead;
    const PARSE_ERROR_SITE: ErrorSite = ErrorSite::AdInfoParse;

    fn version(&self) -> u64 {
        self.version
    }

    fn entry_count(&self) -> usize {
        self.ad_infos.len()
    }
}

impl SnapshotTable for AdCounterTable {
    const TABLE: &'static str = "ad_counter";
    const READ_ERROR_SITE: ErrorSite = ErrorSite::AdCounterRead;
    const PARSE_ERROR_SITE: ErrorSite = ErrorSite::AdCounterParse;

    fn version(&self) -> u64 {
        self.version
    }

    fn entry_count(&self) -> usize {
        self.store_ad_counter.len()
    }
}

/// Latest published table, readable without locks.
pub struct SnapshotStore<T> {
    current: ArcSwap<T>,
}

impl<T: SnapshotTable> SnapshotStore<T> {
    /// Load the table at `path` and return the store with its only writer.
    pub fn load<P: AsRef<Path>>(
        path: P,
    ) -> Result<(Arc<Self>, SnapshotWatcher<T>), SnapshotError> {
        let path = path.as_ref().to_path_buf();
        let bytes = std::fs::read(&path).map_err(|source| SnapshotError::Io {
            path: path.clone(),
            source,
        })?;
        let table = T::decode_snapshot(&bytes)?;

        info!(
            table = T::TABLE,
            version = table.version(),
            entries = table.entry_count(),
            path = %path.display(),
            "Snapshot loaded"
        );
        metrics::set_snapshot_entries(T::TABLE, table.entry_count());

        let store = Arc::new(Self {
            current: ArcSwap::from_pointee(table),
        });
        let watcher = SnapshotWatcher {
            store: store.clone(),
            digest: Sha256::digest(&bytes).into(),
            path,
        };

        Ok((store, watcher))
    }

    /// Store with a fixed table and no writer
    pub fn from_table(table: T) -> Arc<Self> {
        Arc::new(Self {
            current: ArcSwap::from_pointee(table),
        })
    }

    /// Latest published table. Never blocks on the writer.
    pub fn current(&self) -> Arc<T> {
        self.current.load_full()
    }

    fn publish(&self, table: T) {
        self.current.store(Arc::new(table));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Unchanged,
    Reloaded { entries: usize },
    Failed,
}

/// Exclusive write side of a [`SnapshotStore`].
pub struct SnapshotWatcher<T> {
    store: Arc<SnapshotStore<T>>,
    path: PathBuf,
    digest: [u8; 32],
}

impl<T: SnapshotTable> SnapshotWatcher<T> {
    /// Check the file once and publish a new table if its content changed.
    /// The bytes are hashed on every call; size and mtime can stay put
    /// across a rewrite.
    pub async fn poll_once(&mut self) -> ReloadOutcome {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    table = T::TABLE,
                    path = %self.path.display(),
                    error = %e,
                    "Snapshot file unreadable, keeping current table"
                );
                metrics::record_error(T::READ_ERROR_SITE);
                metrics::record_snapshot_reload(T::TABLE, false);
                return ReloadOutcome::Failed;
            }
        };

        let digest: [u8; 32] = Sha256::digest(&bytes).into();
        if digest == self.digest {
            debug!(table = T::TABLE, "Snapshot content unchanged");
            return ReloadOutcome::Unchanged;
        }
        self.digest = digest;

        match T::decode_snapshot(&bytes) {
            Ok(table) => {
                let entries = table.entry_count();
                info!(
                    table = T::TABLE,
                    version = table.version(),
                    entries,
                    "Snapshot reloaded"
                );
                self.store.publish(table);
                metrics::record_snapshot_reload(T::TABLE, true);
                metrics::set_snapshot_entries(T::TABLE, entries);
                ReloadOutcome::Reloaded { entries }
            }
            Err(e) => {
                error!(table = T::TABLE, error = %e, "Snapshot reload failed");
                metrics::record_error(T::PARSE_ERROR_SITE);
                metrics::record_snapshot_reload(T::TABLE, false);
                ReloadOutcome::Failed
            }
        }
    }

    /// Poll forever on a background task.
    pub fn spawn(mut self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                table = T::TABLE,
                path = %self.path.display(),
                interval_secs = interval.as_secs(),
                "Snapshot watcher started"
            );
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately; the table was just loaded.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.poll_once().await;
            }
        })
    }
}

/// Both reference tables captured at one instant.
#[derive(Clone)]
pub struct ReferenceSnapshot {
    pub ad_info: Arc<AdInfoTable>,
    pub ad_counter: Arc<AdCounterTable>,
}

/// Process-wide reference data. The two tables refresh independently.
#[derive(Clone)]
pub struct ReferenceData {
    ad_info: Arc<SnapshotStore<AdInfoTable>>,
    ad_counter: Arc<SnapshotStore<AdCounterTable>>,
}

impl ReferenceData {
    pub fn new(
        ad_info: Arc<SnapshotStore<AdInfoTable>>,
        ad_counter: Arc<SnapshotStore<AdCounterTable>>,
    ) -> Self {
        Self {
            ad_info,
            ad_counter,
        }
    }

    /// Load both tables and start their watchers. Must run inside a tokio runtime.
    pub fn load_and_watch(config: &SnapshotConfig) -> Result<Self, SnapshotError> {
        let (ad_info, ad_info_watcher) =
            SnapshotStore::<AdInfoTable>::load(config.ad_info_path())?;
        let (ad_counter, ad_counter_watcher) =
            SnapshotStore::<AdCounterTable>::load(config.ad_counter_path())?;

        ad_info_watcher.spawn(config.poll_interval());
        ad_counter_watcher.spawn(config.poll_interval());

        Ok(Self::new(ad_info, ad_counter))
    }

    /// Take the tables a request will use for its whole lifetime.
    pub fn snapshot(&self) -> ReferenceSnapshot {
        ReferenceSnapshot {
            ad_info: self.ad_info.current(),
            ad_counter: self.ad_counter.current(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AdInfoEntry;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn ad_info_table(version: u64, cap: i64) -> AdInfoTable {
        let mut table = AdInfoTable {
            version,
            ..Default::default()
        };
        table.ad_infos.insert(
            "ad_id#1".to_string(),
            AdInfoEntry {
                day_attr_install_cap: cap,
                ..Default::default()
            },
        );
        table
    }

    fn write_file(file: &NamedTempFile, bytes: &[u8]) {
        let mut f = std::fs::File::create(file.path()).unwrap();
        f.write_all(bytes).unwrap();
        f.sync_all().unwrap();
    }

    #[test]
    fn test_load_rejects_garbage() {
        let file = NamedTempFile::new().unwrap();
        write_file(&file, &[0xff, 0xff, 0xff]);

        let result = SnapshotStore::<AdInfoTable>::load(file.path());
        assert!(matches!(result, Err(SnapshotError::Decode { .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let result = SnapshotStore::<AdInfoTable>::load("/nonexistent/ad_info.pb");
        assert!(matches!(result, Err(SnapshotError::Io { .. })));
    }

    #[tokio::test]
    async fn test_reload_swaps_and_old_reader_keeps_old_table() {
        let file = NamedTempFile::new().unwrap();
        write_file(&file, &ad_info_table(1, 100).encode_to_vec());

        let (store, mut watcher) = SnapshotStore::<AdInfoTable>::load(file.path()).unwrap();
        let held = store.current();
        assert_eq!(held.version, 1);

        write_file(&file, &ad_info_table(2, 300).encode_to_vec());
        let outcome = watcher.poll_once().await;

        assert_eq!(outcome, ReloadOutcome::Reloaded { entries: 1 });
        assert_eq!(store.current().version, 2);
        assert_eq!(held.version, 1);
        assert_eq!(held.ad_infos["ad_id#1"].day_attr_install_cap, 100);
    }

    #[tokio::test]
    async fn test_bad_reload_keeps_last_good_table() {
        let file = NamedTempFile::new().unwrap();
        write_file(&file, &ad_info_table(1, 100).encode_to_vec());
        let (store, mut watcher) = SnapshotStore::<AdInfoTable>::load(file.path()).unwrap();

        let before = metrics::error_count(ErrorSite::AdInfoParse);
        write_file(&file, &[0xff, 0xff, 0xff, 0xff]);

        assert_eq!(watcher.poll_once().await, ReloadOutcome::Failed);
        assert_eq!(store.current().version, 1);
        assert!(metrics::error_count(ErrorSite::AdInfoParse) > before);
    }

    #[tokio::test]
    async fn test_same_size_rewrite_with_unchanged_mtime_reloads() {
        let file = NamedTempFile::new().unwrap();
        let v1 = ad_info_table(1, 100).encode_to_vec();
        write_file(&file, &v1);
        let (store, mut watcher) = SnapshotStore::<AdInfoTable>::load(file.path()).unwrap();
        let mtime = std::fs::metadata(file.path()).unwrap().modified().unwrap();

        let v2 = ad_info_table(2, 101).encode_to_vec();
        assert_eq!(v1.len(), v2.len());
        write_file(&file, &v2);
        std::fs::File::options()
            .write(true)
            .open(file.path())
            .unwrap()
            .set_modified(mtime)
            .unwrap();

        assert_eq!(
            watcher.poll_once().await,
            ReloadOutcome::Reloaded { entries: 1 }
        );
        assert_eq!(store.current().version, 2);
    }

    #[tokio::test]
    async fn test_unreadable_file_counts_read_error_site() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ad_info.pb");
        std::fs::write(&path, ad_info_table(1, 100).encode_to_vec()).unwrap();
        let (store, mut watcher) = SnapshotStore::<AdInfoTable>::load(&path).unwrap();

        let before = metrics::error_count(ErrorSite::AdInfoRead);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(watcher.poll_once().await, ReloadOutcome::Failed);
        assert_eq!(store.current().version, 1);
        assert!(metrics::error_count(ErrorSite::AdInfoRead) > before);
    }

    #[tokio::test]
    async fn test_same_content_is_unchanged() {
        let file = NamedTempFile::new().unwrap();
        let bytes = ad_info_table(1, 100).encode_to_vec();
        write_file(&file, &bytes);
        let (_store, mut watcher) = SnapshotStore::<AdInfoTable>::load(file.path()).unwrap();

        write_file(&file, &bytes);
        assert_eq!(watcher.poll_once().await, ReloadOutcome::Unchanged);
    }

    #[test]
    fn test_reference_snapshot_is_consistent_pair() {
        let reference = ReferenceData::new(
            SnapshotStore::from_table(ad_info_table(4, 0)),
            SnapshotStore::from_table(AdCounterTable::default()),
        );
        let snapshot = reference.snapshot();
        assert_eq!(snapshot.ad_info.version, 4);
        assert!(snapshot.ad_counter.store_ad_counter.is_empty());
    }
}
