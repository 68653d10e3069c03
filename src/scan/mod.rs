/// Scanning module
///
/// This module drives catalog updates:
/// - Traits for the outside services a scan needs (collaborators.rs)
/// - Product id → collection lookup (registry.rs)
/// - Progress and change notifications (events.rs)
/// - Full scans and single-file additions (orchestrator.rs)

pub mod collaborators;
pub mod events;
pub mod orchestrator;
pub mod registry;

pub use collaborators::{
    CandidateSource, CopyPlacer, DescriptionReader, DirectoryCandidates, JpegExifReader, MediaPlacer,
};
pub use events::{BroadcastNotifier, CatalogEvent, EventSink, NullSink};
pub use orchestrator::{
    open_catalog, AddOutcome, FixedCandidates, ScanCancel, ScanOrchestrator, ScanSettings, ScanSummary,
    SkipReason,
};
pub use registry::{ProductRegistry, ProductTable};
