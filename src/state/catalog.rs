use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use super::data::{Collection, MediaRecord};
use crate::error::{CatalogError, Result};

/// Magic bytes at the start of a persisted catalog
const BLOB_MAGIC: &[u8; 4] = b"DMC\0";
/// Current persisted catalog layout
const BLOB_VERSION: u16 = 1;

/// Lifecycle of a catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogState {
    /// Created or restored, collections not registered yet
    Uninitialized,
    /// Collections registered, no update has completed
    Initialized,
    /// An update is running
    Updating,
    /// At least one update has completed and none is running
    Idle,
}

/// Result of [`MediaCatalog::init`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Initialized,
    AlreadyInitialized,
}

/// Result of [`MediaCatalog::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Added,
    /// A record with the same path is already in the collection
    AlreadyPresent,
    /// The collection key was never registered
    UnknownCollection,
}

/// Point-in-time copy of some or all collections
pub type CatalogSnapshot = BTreeMap<String, Collection>;

#[derive(Debug)]
struct CatalogInner {
    initialized: bool,
    /// Updates currently running
    active_updates: usize,
    /// Set by the first completed update; never cleared
    ready: bool,
    collections: BTreeMap<String, Collection>,
}

/// Persisted form of the catalog, written after the magic and version
#[derive(Serialize, Deserialize)]
struct PersistedCatalog {
    collections: BTreeMap<String, Vec<MediaRecord>>,
}

/// The media catalog: collection key → records keyed by file path.
///
/// One instance is created by the application and shared by reference
/// (usually an `Arc`). Writers (`init`, `insert`, `restore`) take the
/// write lock; `snapshot` copies under the read lock, so a reader never
/// sees half of an insert.
#[derive(Debug)]
pub struct MediaCatalog {
    inner: RwLock<CatalogInner>,
}

impl Default for MediaCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaCatalog {
    /// Create an empty, uninitialized catalog
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CatalogInner {
                initialized: false,
                active_updates: 0,
                ready: false,
                collections: BTreeMap::new(),
            }),
        }
    }

    /// Rebuild an uninitialized catalog from a persisted blob
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let collections = decode_blob(bytes)?;
        Ok(Self {
            inner: RwLock::new(CatalogInner {
                initialized: false,
                active_updates: 0,
                ready: false,
                collections,
            }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogInner> {
        // Every write is applied in one step, so a poisoned lock is still consistent
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CatalogInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CatalogState {
        let inner = self.read();
        if !inner.initialized {
            CatalogState::Uninitialized
        } else if inner.active_updates > 0 {
            CatalogState::Updating
        } else if inner.ready {
            CatalogState::Idle
        } else {
            CatalogState::Initialized
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state() != CatalogState::Uninitialized
    }

    /// Register the collection keys.
    ///
    /// Keys already present (restored from disk) keep their records.
    /// A second call changes nothing and reports `AlreadyInitialized`.
    pub fn init<I, S>(&self, collection_keys: I) -> InitOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.write();
        if inner.initialized {
            return InitOutcome::AlreadyInitialized;
        }

        for key in collection_keys {
            inner.collections.entry(key.into()).or_default();
        }
        inner.initialized = true;

        info!("Catalog initialized with {} collections", inner.collections.len());
        InitOutcome::Initialized
    }

    /// Registered collection keys
    pub fn collection_keys(&self) -> BTreeSet<String> {
        self.read().collections.keys().cloned().collect()
    }

    pub fn has_collection(&self, key: &str) -> bool {
        self.read().collections.contains_key(key)
    }

    /// Add `record` to `collection_key` unless its path is already there
    pub fn insert(&self, collection_key: &str, record: MediaRecord) -> Result<InsertOutcome> {
        let mut inner = self.write();
        if !inner.initialized {
            return Err(CatalogError::NotInitialized);
        }

        let Some(collection) = inner.collections.get_mut(collection_key) else {
            return Ok(InsertOutcome::UnknownCollection);
        };
        if collection.contains_key(&record.file_path) {
            return Ok(InsertOutcome::AlreadyPresent);
        }

        debug!("Catalogued {} under {}", record.file_path, collection_key);
        collection.insert(record.file_path.clone(), record);
        Ok(InsertOutcome::Added)
    }

    /// Whether `collection_key` already holds `file_path`
    pub fn contains(&self, collection_key: &str, file_path: &str) -> bool {
        self.read()
            .collections
            .get(collection_key)
            .is_some_and(|collection| collection.contains_key(file_path))
    }

    /// Copy one collection (`Some(key)`) or all of them (`None`).
    /// An unknown key yields an empty snapshot.
    pub fn snapshot(&self, collection_key: Option<&str>) -> CatalogSnapshot {
        let inner = self.read();
        match collection_key {
            Some(key) => inner
                .collections
                .get_key_value(key)
                .map(|(k, v)| (k.clone(), v.clone()))
                .into_iter()
                .collect(),
            None => inner.collections.clone(),
        }
    }

    /// Total number of records across all collections
    pub fn record_count(&self) -> usize {
        self.read().collections.values().map(Collection::len).sum()
    }

    /// Encode the whole catalog as a versioned blob
    pub fn serialize(&self) -> Vec<u8> {
        let persisted = {
            let inner = self.read();
            PersistedCatalog {
                collections: inner
                    .collections
                    .iter()
                    .map(|(key, records)| (key.clone(), records.values().cloned().collect()))
                    .collect(),
            }
        };

        let mut blob = Vec::with_capacity(256);
        blob.extend_from_slice(BLOB_MAGIC);
        blob.extend_from_slice(&BLOB_VERSION.to_be_bytes());
        // Maps with string keys and plain records always serialize
        if let Err(e) = serde_json::to_writer(&mut blob, &persisted) {
            tracing::error!("Failed to encode catalog: {}", e);
        }
        blob
    }

    /// Replace the catalog contents with a persisted blob.
    ///
    /// The blob is fully decoded before anything is touched; on error the
    /// catalog is unchanged. If the catalog is already initialized, its
    /// registered keys stay registered.
    pub fn restore(&self, bytes: &[u8]) -> Result<()> {
        let mut restored = decode_blob(bytes)?;

        let mut inner = self.write();
        if inner.initialized {
            for key in inner.collections.keys() {
                restored.entry(key.clone()).or_default();
            }
        }
        inner.collections = restored;
        Ok(())
    }

    /// Move to `Updating`. Fails unless `init` has run.
    /// Overlapping updates are counted; the catalog stays `Updating`
    /// until the last one ends.
    pub(crate) fn begin_update(&self) -> Result<()> {
        let mut inner = self.write();
        if !inner.initialized {
            return Err(CatalogError::NotInitialized);
        }
        inner.active_updates += 1;
        Ok(())
    }

    /// Leave one update. A completed update makes the catalog ready for
    /// good; an abandoned one leaves readiness as it was.
    pub(crate) fn end_update(&self, completed: bool) {
        let mut inner = self.write();
        inner.active_updates = inner.active_updates.saturating_sub(1);
        inner.ready |= completed;
    }
}

fn decode_blob(bytes: &[u8]) -> Result<BTreeMap<String, Collection>> {
    let corrupt = |reason: String| CatalogError::CorruptPersistedState(reason);

    let body = bytes
        .strip_prefix(BLOB_MAGIC.as_slice())
        .ok_or_else(|| corrupt("missing catalog header".to_string()))?;
    let (version, payload) = match body {
        [hi, lo, rest @ ..] => (u16::from_be_bytes([*hi, *lo]), rest),
        _ => return Err(corrupt("missing catalog version".to_string())),
    };
    if version != BLOB_VERSION {
        return Err(corrupt(format!("unsupported catalog version {}", version)));
    }

    let persisted: PersistedCatalog =
        serde_json::from_slice(payload).map_err(|e| corrupt(e.to_string()))?;

    let mut collections = BTreeMap::new();
    for (key, records) in persisted.collections {
        let mut collection = Collection::new();
        for record in records {
            if collection.contains_key(&record.file_path) {
                return Err(corrupt(format!(
                    "duplicate path {} in collection {}",
                    record.file_path, key
                )));
            }
            collection.insert(record.file_path.clone(), record);
        }
        collections.insert(key, collection);
    }
    Ok(collections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::MediaType;
    use crate::state::provenance::ProvenanceRecord;

    fn photo(path: &str) -> MediaRecord {
        MediaRecord::new(
            path,
            MediaType::Photo,
            ProvenanceRecord::new("0914").with_media_date("2013-07-25T160101+0100"),
        )
    }

    #[test]
    fn test_insert_before_init_fails() {
        let catalog = MediaCatalog::new();
        assert!(matches!(
            catalog.insert("bebop", photo("bebop/a.jpg")),
            Err(CatalogError::NotInitialized)
        ));
        assert_eq!(catalog.record_count(), 0);
    }

    #[test]
    fn test_init_is_idempotent() {
        let catalog = MediaCatalog::new();
        assert_eq!(catalog.init(["bebop", "jumpingsumo"]), InitOutcome::Initialized);
        catalog.insert("bebop", photo("bebop/a.jpg")).unwrap();

        assert_eq!(catalog.init(["bebop", "other"]), InitOutcome::AlreadyInitialized);
        assert!(!catalog.has_collection("other"));
        assert!(catalog.contains("bebop", "bebop/a.jpg"));
        assert_eq!(catalog.state(), CatalogState::Initialized);
    }

    #[test]
    fn test_insert_dedups_by_path() {
        let catalog = MediaCatalog::new();
        catalog.init(["bebop"]);

        assert_eq!(catalog.insert("bebop", photo("bebop/a.jpg")).unwrap(), InsertOutcome::Added);
        assert_eq!(
            catalog.insert("bebop", photo("bebop/a.jpg")).unwrap(),
            InsertOutcome::AlreadyPresent
        );
        assert_eq!(catalog.snapshot(Some("bebop"))["bebop"].len(), 1);
    }

    #[test]
    fn test_insert_into_unregistered_collection() {
        let catalog = MediaCatalog::new();
        catalog.init(["bebop"]);
        assert_eq!(
            catalog.insert("skycontroller", photo("x.jpg")).unwrap(),
            InsertOutcome::UnknownCollection
        );
        assert_eq!(catalog.record_count(), 0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let catalog = MediaCatalog::new();
        catalog.init(["bebop", "jumpingsumo"]);
        catalog.insert("bebop", photo("bebop/a.jpg")).unwrap();

        let before = catalog.snapshot(None);
        catalog.insert("bebop", photo("bebop/b.jpg")).unwrap();

        assert_eq!(before["bebop"].len(), 1);
        assert_eq!(catalog.snapshot(None)["bebop"].len(), 2);
        assert_eq!(catalog.snapshot(Some("jumpingsumo")).len(), 1);
        assert!(catalog.snapshot(Some("nope")).is_empty());
    }

    #[test]
    fn test_serialize_round_trip() {
        let catalog = MediaCatalog::new();
        catalog.init(["bebop", "jumpingsumo", "empty"]);
        catalog.insert("bebop", photo("bebop/a.jpg")).unwrap();
        let mut video = MediaRecord::new(
            "jumpingsumo/clip.mp4",
            MediaType::Video,
            ProvenanceRecord::new("0902").with_uuid("ABCD").with_run_date("2015-01-01T101010+0000"),
        )
        .with_size(Some(3 << 30));
        video.thumbnail = Some(vec![0xFF, 0xD8, 0x00]);
        catalog.insert("jumpingsumo", video).unwrap();

        let restored = MediaCatalog::from_bytes(&catalog.serialize()).unwrap();
        assert_eq!(restored.snapshot(None), catalog.snapshot(None));
        assert_eq!(restored.state(), CatalogState::Uninitialized);
    }

    #[test]
    fn test_empty_catalog_round_trip() {
        let restored = MediaCatalog::from_bytes(&MediaCatalog::new().serialize()).unwrap();
        assert!(restored.snapshot(None).is_empty());
    }

    #[test]
    fn test_init_keeps_restored_records() {
        let original = MediaCatalog::new();
        original.init(["bebop"]);
        original.insert("bebop", photo("bebop/a.jpg")).unwrap();

        let restored = MediaCatalog::from_bytes(&original.serialize()).unwrap();
        restored.init(["bebop", "jumpingsumo"]);
        assert!(restored.contains("bebop", "bebop/a.jpg"));
        assert!(restored.has_collection("jumpingsumo"));
        assert_eq!(
            restored.insert("bebop", photo("bebop/a.jpg")).unwrap(),
            InsertOutcome::AlreadyPresent
        );
    }

    #[test]
    fn test_corrupt_blobs_are_rejected() {
        let good = {
            let catalog = MediaCatalog::new();
            catalog.init(["bebop"]);
            catalog.insert("bebop", photo("bebop/a.jpg")).unwrap();
            catalog.serialize()
        };

        let mut wrong_version = good.clone();
        wrong_version[5] = 9;
        let truncated = &good[..good.len() - 3];
        let duplicate = {
            let mut blob = BLOB_MAGIC.to_vec();
            blob.extend(BLOB_VERSION.to_be_bytes());
            let record = serde_json::to_string(&photo("bebop/a.jpg")).unwrap();
            blob.extend(format!(r#"{{"collections":{{"bebop":[{record},{record}]}}}}"#).into_bytes());
            blob
        };

        let blobs: [&[u8]; 6] = [b"", b"DMC", b"XXXX\0\x01{}", &wrong_version, truncated, &duplicate];
        for blob in blobs {
            assert!(
                matches!(MediaCatalog::from_bytes(blob), Err(CatalogError::CorruptPersistedState(_))),
                "accepted {:?}",
                String::from_utf8_lossy(blob)
            );
        }
    }

    #[test]
    fn test_failed_restore_leaves_catalog_untouched() {
        let catalog = MediaCatalog::new();
        catalog.init(["bebop"]);
        catalog.insert("bebop", photo("bebop/a.jpg")).unwrap();

        assert!(catalog.restore(b"garbage").is_err());
        assert!(catalog.contains("bebop", "bebop/a.jpg"));
    }

    #[test]
    fn test_restore_after_init_keeps_registered_keys() {
        let source = MediaCatalog::new();
        source.init(["bebop"]);
        source.insert("bebop", photo("bebop/a.jpg")).unwrap();

        let catalog = MediaCatalog::new();
        catalog.init(["jumpingsumo"]);
        catalog.restore(&source.serialize()).unwrap();
        assert!(catalog.contains("bebop", "bebop/a.jpg"));
        assert!(catalog.has_collection("jumpingsumo"));
    }

    #[test]
    fn test_update_states() {
        let catalog = MediaCatalog::new();
        assert!(matches!(catalog.begin_update(), Err(CatalogError::NotInitialized)));

        catalog.init(["bebop"]);
        catalog.begin_update().unwrap();
        assert_eq!(catalog.state(), CatalogState::Updating);
        catalog.end_update(false);
        assert_eq!(catalog.state(), CatalogState::Initialized);

        catalog.begin_update().unwrap();
        catalog.end_update(true);
        assert_eq!(catalog.state(), CatalogState::Idle);

        catalog.begin_update().unwrap();
        catalog.end_update(false);
        assert_eq!(catalog.state(), CatalogState::Idle);
    }

    #[test]
    fn test_overlapping_updates_keep_readiness() {
        let catalog = MediaCatalog::new();
        catalog.init(["bebop"]);

        // A starts, B starts, A completes, B is abandoned
        catalog.begin_update().unwrap();
        catalog.begin_update().unwrap();
        catalog.end_update(true);
        assert_eq!(catalog.state(), CatalogState::Updating);
        catalog.end_update(false);
        assert_eq!(catalog.state(), CatalogState::Idle);
    }

    #[test]
    fn test_snapshots_during_inserts_are_consistent() {
        let catalog = MediaCatalog::new();
        catalog.init(["bebop", "jumpingsumo"]);
        const PER_COLLECTION: usize = 300;

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..PER_COLLECTION {
                    for key in ["bebop", "jumpingsumo"] {
                        let record = MediaRecord::new(
                            format!("{key}/clip_{i:04}.mp4"),
                            MediaType::Video,
                            ProvenanceRecord::new("0914").with_uuid(format!("uuid-{i}")),
                        )
                        .with_size(Some(i as u64));
                        catalog.insert(key, record).unwrap();
                    }
                }
            });

            let mut last = (0, 0);
            loop {
                let snapshot = catalog.snapshot(None);
                let sizes = (snapshot["bebop"].len(), snapshot["jumpingsumo"].len());
                assert!(sizes.0 >= last.0 && sizes.1 >= last.1);
                // bebop is always written first
                assert!(sizes.0 == sizes.1 || sizes.0 == sizes.1 + 1);
                for (key, collection) in &snapshot {
                    for (path, record) in collection {
                        assert_eq!(path, &record.file_path);
                        assert!(path.starts_with(key.as_str()));
                        assert_eq!(record.provenance.product_id, "0914");
                        assert!(record.provenance.uuid.is_some());
                        assert!(record.size.is_some());
                    }
                }
                last = sizes;
                if sizes == (PER_COLLECTION, PER_COLLECTION) {
                    break;
                }
            }

            // Snapshots are detached copies
            let mut detached = catalog.snapshot(Some("bebop"));
            detached.get_mut("bebop").unwrap().clear();
            assert_eq!(catalog.snapshot(Some("bebop"))["bebop"].len(), PER_COLLECTION);
        });
    }
}
