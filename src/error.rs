/// Error types shared across the catalog
///
/// Only ordering mistakes (`NotInitialized`, `NotReady`) and a corrupt
/// persisted catalog surface as hard failures. Everything else is absorbed
/// per file by the scan orchestrator.
use thiserror::Error;

/// Failure while walking the box structure of a media container
#[derive(Error, Debug)]
pub enum AtomError {
    #[error("IO error while scanning atoms: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt atom at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: &'static str },
}

/// Provenance text that could not be turned into a record
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("provenance is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("provenance is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provenance is not a key/value object")]
    NotAnObject,
}

/// Failure while rewriting the provenance of a video
#[derive(Error, Debug)]
pub enum PvatError {
    #[error(transparent)]
    Atom(#[from] AtomError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("file has no pvat atom")]
    Missing,
}

/// Failure of the persistence collaborator
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration file problems
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Caller-visible catalog failures
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog has not been initialized")]
    NotInitialized,

    #[error("catalog has not completed an update yet")]
    NotReady,

    #[error("persisted catalog is corrupt: {0}")]
    CorruptPersistedState(String),

    #[error("catalog store failed: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// An atom path segment that is not a four character code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid atom path segment '{0}'")]
pub struct InvalidAtomPath(pub String);
