//! Catalogue of drone photos and videos.
//!
//! Media files carry a small JSON provenance record: videos in a `pvat`
//! atom, photos in the EXIF image description. The catalog groups files
//! by the product that recorded them and persists itself as one blob.

pub mod config;
pub mod error;
pub mod media;
pub mod scan;
pub mod state;

pub use config::CatalogConfig;
pub use error::{AtomError, CatalogError, ConfigError, DecodeError, PvatError, Result, StoreError};
pub use scan::{AddOutcome, BroadcastNotifier, CatalogEvent, ScanCancel, ScanOrchestrator, ScanSettings, ScanSummary};
pub use state::{MediaCatalog, MediaRecord, MediaType, ProvenanceRecord};
