/// Catalog configuration
///
/// Read from a JSON file; every field is optional. Example:
///
/// ```json
/// {
///   "media_root": "/home/pilot/Pictures/DCIM",
///   "collections": ["bebop", "jumpingsumo"],
///   "products": { "0914": "bebop", "0902": "jumpingsumo" }
/// }
/// ```
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;
use crate::scan::registry::ProductTable;
use crate::state::library::SqliteStore;

const APP_DIR: &str = "drone-media-catalog";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory holding one folder per collection
    pub media_root: PathBuf,
    /// SQLite file the catalog blob is saved in
    pub database_path: PathBuf,
    /// Collection keys registered at startup
    pub collections: Vec<String>,
    /// Hex product id → collection key
    pub products: BTreeMap<String, String>,
    pub transfer_marker: String,
    pub photo_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
    /// Depth of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let media_root = dirs::picture_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("DCIM");
        let database_path =
            SqliteStore::default_path().unwrap_or_else(|| PathBuf::from("catalog.db"));

        Self {
            media_root,
            database_path,
            collections: Vec::new(),
            products: BTreeMap::new(),
            transfer_marker: "downloading_".to_string(),
            photo_extensions: vec!["jpg".to_string(), "jpeg".to_string()],
            video_extensions: vec!["mp4".to_string(), "mov".to_string()],
            event_capacity: 256,
        }
    }
}

impl CatalogConfig {
    /// Location used when no config path is given
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
    }

    /// Load `path`, or the default location when `None`.
    ///
    /// A missing file at the default location gives the defaults; a
    /// missing file that was asked for explicitly is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        match fs::read_to_string(&path) {
            Ok(text) => Self::from_json(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound && !explicit => {
                debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Product registry described by `products`
    pub fn registry(&self) -> ProductTable {
        self.products.iter().collect()
    }
}
