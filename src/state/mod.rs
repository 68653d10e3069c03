/// State management module
///
/// This module handles all catalog state, including:
/// - Shared data structures (data.rs)
/// - Provenance records and their JSON codec (provenance.rs)
/// - The in-memory catalog and its persisted blob (catalog.rs)
/// - The SQLite store the blob is saved to (library.rs)

pub mod catalog;
pub mod data;
pub mod library;
pub mod provenance;

pub use catalog::{CatalogSnapshot, CatalogState, InitOutcome, InsertOutcome, MediaCatalog};
pub use data::{Collection, MediaRecord, MediaType};
pub use library::{CatalogStore, InMemoryStore, SqliteStore};
pub use provenance::ProvenanceRecord;
