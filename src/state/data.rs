/// Shared data structures for the catalog
///
/// These structs represent the data model that flows between
/// the scanner, the in-memory catalog and the persisted blob.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::provenance::ProvenanceRecord;

/// Kind of media, decided from the file extension
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
}

/// Represents a single catalogued photo or video
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MediaRecord {
    /// Path relative to the media root (e.g. "bebop/Bebop_2015-03-01.mp4")
    pub file_path: String,
    pub media_type: MediaType,
    /// Provenance decoded from the file itself
    pub provenance: ProvenanceRecord,
    /// File size in bytes, when known
    #[serde(default)]
    pub size: Option<u64>,
    /// Opaque thumbnail bytes supplied by the caller; never generated here
    #[serde(default)]
    pub thumbnail: Option<Vec<u8>>,
}

impl MediaRecord {
    pub fn new(file_path: impl Into<String>, media_type: MediaType, provenance: ProvenanceRecord) -> Self {
        Self {
            file_path: file_path.into(),
            media_type,
            provenance,
            size: None,
            thumbnail: None,
        }
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }
}

/// One product's media, keyed by `file_path`
pub type Collection = BTreeMap<String, MediaRecord>;
