use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;

/// Settings key the catalog blob is stored under
pub const CATALOG_KEY: &str = "media_catalog";

/// Where the persisted catalog lives between runs
pub trait CatalogStore: Send + Sync {
    /// Save the serialized catalog, replacing any previous copy
    fn persist(&self, bytes: &[u8]) -> Result<(), StoreError>;

    /// Load the last saved catalog, if any
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError>;
}

/// The Library keeps the catalog blob in a small SQLite key/value table.
///
/// The database file is created in the user's data directory by default:
/// - Linux: ~/.local/share/drone-media-catalog/catalog.db
/// - macOS: ~/Library/Application Support/drone-media-catalog/catalog.db
/// - Windows: %APPDATA%\drone-media-catalog\catalog.db
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the store at `db_path`
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = db_path.into();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        info!("Catalog database opened at {}", db_path.display());

        let store = SqliteStore {
            conn: Mutex::new(conn),
            db_path,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Default location of the database
    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::data_dir().or_else(dirs::home_dir)?;
        path.push("drone-media-catalog");
        path.push("catalog.db");
        Some(path)
    }

    /// Creates the settings table if it doesn't exist
    fn init_schema(&self) -> Result<(), StoreError> {
        self.connection().execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key             TEXT PRIMARY KEY,
                value           BLOB NOT NULL,
                updated_at      INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Unix timestamp of the last save, if the catalog was ever saved
    pub fn last_saved(&self) -> Result<Option<i64>, StoreError> {
        let updated_at = self
            .connection()
            .query_row(
                "SELECT updated_at FROM settings WHERE key = ?1",
                [CATALOG_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(updated_at)
    }
}

impl CatalogStore for SqliteStore {
    fn persist(&self, bytes: &[u8]) -> Result<(), StoreError> {
        self.connection().execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![CATALOG_KEY, bytes, Utc::now().timestamp()],
        )?;
        debug!("Persisted catalog ({} bytes)", bytes.len());
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .connection()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [CATALOG_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

/// Keeps the blob in memory; for tests and embedders with their own storage
#[derive(Debug, Default)]
pub struct InMemoryStore {
    blob: Mutex<Option<Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CatalogStore for InMemoryStore {
    fn persist(&self, bytes: &[u8]) -> Result<(), StoreError> {
        *self.blob.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(bytes.to_vec());
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blob.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone())
    }
}
