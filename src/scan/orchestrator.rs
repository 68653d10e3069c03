use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::collaborators::{
    CandidateSource, CopyPlacer, DescriptionReader, DirectoryCandidates, JpegExifReader, MediaPlacer,
};
use super::events::{CatalogEvent, EventSink, NullSink};
use super::registry::{ProductRegistry, ProductTable};
use crate::config::CatalogConfig;
use crate::error::{AtomError, CatalogError, DecodeError, Result};
use crate::media::atom::{self, PVAT};
use crate::state::catalog::{CatalogState, InitOutcome, InsertOutcome, MediaCatalog};
use crate::state::data::{MediaRecord, MediaType};
use crate::state::library::CatalogStore;
use crate::state::provenance::{self, ProvenanceRecord};

/// Why a file was left out of the catalog
#[derive(Error, Debug)]
pub enum SkipReason {
    #[error("not a photo or video file")]
    UnsupportedType,

    #[error("no provenance found")]
    NoProvenance,

    #[error("could not scan atoms: {0}")]
    Atom(#[from] AtomError),

    #[error("could not decode provenance: {0}")]
    Decode(#[from] DecodeError),

    #[error("unknown product '{0}'")]
    UnknownProduct(String),

    #[error("collection '{0}' is not registered")]
    UnregisteredCollection(String),

    #[error("could not place file: {0}")]
    Placement(std::io::Error),
}

/// Result of [`ScanOrchestrator::add_single`]
#[derive(Debug)]
pub enum AddOutcome {
    /// Catalogued under this collection-relative path
    Added(String),
    AlreadyPresent(String),
    Rejected(SkipReason),
}

/// Counters of one `update()` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub candidates: usize,
    pub added: usize,
    pub already_present: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub persisted: bool,
}

/// Cancellation flag shared between a running scan and its owner
#[derive(Debug, Clone, Default)]
pub struct ScanCancel(Arc<AtomicBool>);

impl ScanCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// File classification and filtering rules
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Paths in the catalog are stored relative to this directory
    pub media_root: PathBuf,
    /// Files whose name contains this are still being transferred
    pub transfer_marker: String,
    pub photo_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
}

impl ScanSettings {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            transfer_marker: "downloading_".to_string(),
            photo_extensions: vec!["jpg".to_string(), "jpeg".to_string()],
            video_extensions: vec!["mp4".to_string(), "mov".to_string()],
        }
    }

    /// Decide photo or video from the file extension
    pub fn classify(&self, path: &Path) -> Option<MediaType> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        if self.photo_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            Some(MediaType::Photo)
        } else if self.video_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            Some(MediaType::Video)
        } else {
            None
        }
    }

    /// Whether `path` is a partially transferred file
    pub fn is_in_flight(&self, path: &Path) -> bool {
        !self.transfer_marker.is_empty()
            && path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().contains(&self.transfer_marker))
    }

    /// Catalog path of `path`: relative to the media root, `/`-separated
    pub fn relative_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.media_root) {
            Ok(relative) => relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}

impl From<&CatalogConfig> for ScanSettings {
    fn from(config: &CatalogConfig) -> Self {
        Self {
            media_root: config.media_root.clone(),
            transfer_marker: config.transfer_marker.clone(),
            photo_extensions: config.photo_extensions.clone(),
            video_extensions: config.video_extensions.clone(),
        }
    }
}

/// What a candidate turned out to be, before insertion
struct Inspected {
    media_type: MediaType,
    provenance: ProvenanceRecord,
    collection_key: String,
}

/// Drives full and single-file catalog updates.
///
/// Flow per file: provenance bytes → decoded record → product → catalog
/// insertion → event. A file that fails any step is skipped; only
/// ordering mistakes abort a call.
pub struct ScanOrchestrator {
    catalog: Arc<MediaCatalog>,
    store: Arc<dyn CatalogStore>,
    settings: ScanSettings,
    candidates: Arc<dyn CandidateSource>,
    descriptions: Arc<dyn DescriptionReader>,
    registry: Arc<dyn ProductRegistry>,
    placer: Arc<dyn MediaPlacer>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("settings", &self.settings)
            .field("state", &self.catalog.state())
            .finish()
    }
}

impl ScanOrchestrator {
    /// Orchestrator over a plain directory tree rooted at
    /// `settings.media_root`, with an empty product registry and no observers.
    pub fn new(catalog: Arc<MediaCatalog>, store: Arc<dyn CatalogStore>, settings: ScanSettings) -> Self {
        let root = settings.media_root.clone();
        Self {
            catalog,
            store,
            settings,
            candidates: Arc::new(DirectoryCandidates::new(root.clone())),
            descriptions: Arc::new(JpegExifReader),
            registry: Arc::new(ProductTable::new()),
            placer: Arc::new(CopyPlacer::new(root)),
            events: Arc::new(NullSink),
        }
    }

    pub fn with_candidates(mut self, candidates: Arc<dyn CandidateSource>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_descriptions(mut self, descriptions: Arc<dyn DescriptionReader>) -> Self {
        self.descriptions = descriptions;
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn ProductRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_placer(mut self, placer: Arc<dyn MediaPlacer>) -> Self {
        self.placer = placer;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn catalog(&self) -> &Arc<MediaCatalog> {
        &self.catalog
    }

    /// Register collections and announce it with an `Init` event.
    /// A repeated call is a no-op and emits nothing.
    pub fn init<I, S>(&self, collection_keys: I) -> InitOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let outcome = self.catalog.init(collection_keys);
        if outcome == InitOutcome::Initialized {
            self.events.notify(CatalogEvent::Init);
        }
        outcome
    }

    /// Scan every registered collection and catalogue what is new
    pub fn update(&self) -> Result<ScanSummary> {
        self.update_with_cancel(&ScanCancel::new())
    }

    /// [`update`](Self::update), checking `cancel` between files.
    ///
    /// A cancelled scan keeps what it already inserted; a later update
    /// picks up the rest.
    pub fn update_with_cancel(&self, cancel: &ScanCancel) -> Result<ScanSummary> {
        self.catalog.begin_update()?;

        let mut queue = Vec::new();
        for key in self.catalog.collection_keys() {
            match self.candidates.list_candidates(&key) {
                Ok(paths) => queue.extend(
                    paths
                        .into_iter()
                        .filter(|path| !self.settings.is_in_flight(path))
                        .map(|path| (key.clone(), path)),
                ),
                Err(e) => warn!("Could not list candidates for {}: {}", key, e),
            }
        }

        let total = queue.len();
        info!("Scanning {} candidate files", total);
        let mut summary = ScanSummary {
            candidates: total,
            ..ScanSummary::default()
        };

        if total == 0 {
            self.events.notify(CatalogEvent::Updating(100.0));
        }
        for (processed, (listed_under, path)) in queue.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Scan cancelled after {} of {} files", processed, total);
                summary.cancelled = true;
                break;
            }

            match self.catalogue(listed_under, path) {
                Ok(InsertOutcome::Added) => summary.added += 1,
                Ok(_) => summary.already_present += 1,
                Err(reason) => {
                    debug!("Skipped {}: {}", path.display(), reason);
                    summary.skipped += 1;
                }
            }

            let percent = (processed + 1) as f64 / total as f64 * 100.0;
            self.events.notify(CatalogEvent::Updating(percent));
        }

        summary.persisted = self.persist();
        self.catalog.end_update(!summary.cancelled);
        self.events
            .notify(CatalogEvent::Updated(!summary.cancelled && summary.persisted));

        info!(
            "Scan finished: {} added, {} already known, {} skipped",
            summary.added, summary.already_present, summary.skipped
        );
        Ok(summary)
    }

    /// Run [`update_with_cancel`](Self::update_with_cancel) on tokio's
    /// blocking pool. Must be called from within a tokio runtime.
    pub fn spawn_update(self: &Arc<Self>, cancel: ScanCancel) -> JoinHandle<Result<ScanSummary>> {
        let orchestrator = Arc::clone(self);
        tokio::task::spawn_blocking(move || orchestrator.update_with_cancel(&cancel))
    }

    /// Catalogue one new file: place it in its product's folder and add it.
    ///
    /// Only allowed once an update has completed. Extraction, resolution
    /// and placement failures come back as [`AddOutcome::Rejected`] and
    /// leave the catalog untouched.
    pub fn add_single(&self, file: &Path) -> Result<AddOutcome> {
        if self.catalog.state() != CatalogState::Idle {
            return Err(CatalogError::NotReady);
        }

        let inspected = match self.inspect(file) {
            Ok(inspected) => inspected,
            Err(reason) => {
                warn!("Not adding {}: {}", file.display(), reason);
                return Ok(AddOutcome::Rejected(reason));
            }
        };

        let placed = match self.placer.place(file, &inspected.collection_key) {
            Ok(placed) => placed,
            Err(e) => {
                warn!("Could not place {}: {}", file.display(), e);
                return Ok(AddOutcome::Rejected(SkipReason::Placement(e)));
            }
        };

        let relative = self.settings.relative_path(&placed);
        let key = inspected.collection_key.clone();
        let record = self.record_for(&placed, relative.clone(), inspected);
        match self.catalog.insert(&key, record)? {
            InsertOutcome::Added => {
                self.events.notify(CatalogEvent::MediaAdded(relative.clone()));
                self.persist();
                Ok(AddOutcome::Added(relative))
            }
            InsertOutcome::AlreadyPresent => Ok(AddOutcome::AlreadyPresent(relative)),
            InsertOutcome::UnknownCollection => {
                Ok(AddOutcome::Rejected(SkipReason::UnregisteredCollection(key)))
            }
        }
    }

    /// Extract, resolve and insert one scanned file
    fn catalogue(&self, listed_under: &str, path: &Path) -> std::result::Result<InsertOutcome, SkipReason> {
        let relative = self.settings.relative_path(path);
        // Re-scans skip the extraction for files already catalogued where they were listed
        if self.catalog.contains(listed_under, &relative) {
            return Ok(InsertOutcome::AlreadyPresent);
        }

        let inspected = self.inspect(path)?;
        let key = inspected.collection_key.clone();
        let record = self.record_for(path, relative.clone(), inspected);

        match self.catalog.insert(&key, record) {
            Ok(InsertOutcome::Added) => {
                self.events.notify(CatalogEvent::MediaAdded(relative));
                Ok(InsertOutcome::Added)
            }
            Ok(InsertOutcome::AlreadyPresent) => Ok(InsertOutcome::AlreadyPresent),
            Ok(InsertOutcome::UnknownCollection) | Err(_) => Err(SkipReason::UnregisteredCollection(key)),
        }
    }

    /// Classify `path`, read its provenance and find its collection
    fn inspect(&self, path: &Path) -> std::result::Result<Inspected, SkipReason> {
        let media_type = self.settings.classify(path).ok_or(SkipReason::UnsupportedType)?;

        let payload = match media_type {
            MediaType::Video => atom::locate_in_file(path, PVAT)?,
            MediaType::Photo => self.descriptions.read_description(path).map(String::into_bytes),
        };
        let provenance = provenance::decode(&payload.ok_or(SkipReason::NoProvenance)?)?;

        let collection_key = self
            .registry
            .resolve(&provenance.product_id)
            .ok_or_else(|| SkipReason::UnknownProduct(provenance.product_id.clone()))?;
        if !self.catalog.has_collection(&collection_key) {
            return Err(SkipReason::UnregisteredCollection(collection_key));
        }

        Ok(Inspected {
            media_type,
            provenance,
            collection_key,
        })
    }

    fn record_for(&self, path: &Path, relative: String, inspected: Inspected) -> MediaRecord {
        let size = fs::metadata(path).ok().map(|m| m.len());
        MediaRecord::new(relative, inspected.media_type, inspected.provenance).with_size(size)
    }

    /// Save the catalog; failures are logged and reported as `false`
    fn persist(&self) -> bool {
        match self.store.persist(&self.catalog.serialize()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not persist catalog: {}", e);
                false
            }
        }
    }
}

/// Load the persisted catalog from `store`, or start empty when there is none
pub fn open_catalog(store: &dyn CatalogStore) -> Result<MediaCatalog> {
    match store.load()? {
        Some(bytes) => MediaCatalog::from_bytes(&bytes),
        None => Ok(MediaCatalog::new()),
    }
}

/// Candidate source over an explicit list of files, grouped by collection.
/// Used when the caller already knows which files to look at.
#[derive(Debug, Clone, Default)]
pub struct FixedCandidates {
    files: Vec<(String, PathBuf)>,
}

impl FixedCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, collection_key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.files.push((collection_key.into(), path.into()));
        self
    }
}

impl CandidateSource for FixedCandidates {
    fn list_candidates(&self, collection_key: &str) -> std::io::Result<Vec<PathBuf>> {
        Ok(self
            .files
            .iter()
            .filter(|(key, _)| key == collection_key)
            .map(|(_, path)| path.clone())
            .collect())
    }
}
