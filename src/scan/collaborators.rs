/// Outside services the scanner relies on
///
/// Each concern is a narrow trait so embedders can plug in a platform
/// media index, another EXIF codec or their own file placement. The
/// default implementations work on a plain directory tree:
/// `<media root>/<collection key>/<files>`.
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::media::exif;

/// Lists the files that may belong to a collection
pub trait CandidateSource: Send + Sync {
    fn list_candidates(&self, collection_key: &str) -> io::Result<Vec<PathBuf>>;
}

/// Reads the EXIF image description of a photo
pub trait DescriptionReader: Send + Sync {
    fn read_description(&self, path: &Path) -> Option<String>;
}

/// Puts a file into a collection's storage area and returns where it landed
pub trait MediaPlacer: Send + Sync {
    fn place(&self, file: &Path, collection_key: &str) -> io::Result<PathBuf>;
}

/// Walks `<root>/<collection key>` recursively
#[derive(Debug, Clone)]
pub struct DirectoryCandidates {
    root: PathBuf,
    follow_links: bool,
}

impl DirectoryCandidates {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            follow_links: true,
        }
    }

    /// Enable or disable following symbolic links
    pub fn with_follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }
}

impl CandidateSource for DirectoryCandidates {
    fn list_candidates(&self, collection_key: &str) -> io::Result<Vec<PathBuf>> {
        let folder = self.root.join(collection_key);
        if !folder.is_dir() {
            debug!("No media folder for {} at {}", collection_key, folder.display());
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&folder)
            .follow_links(self.follow_links)
            .sort_by_file_name()
        {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable entry under {}: {}", folder.display(), e),
            }
        }
        Ok(files)
    }
}

/// Reads descriptions straight from JPEG files
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegExifReader;

impl DescriptionReader for JpegExifReader {
    fn read_description(&self, path: &Path) -> Option<String> {
        exif::read_image_description(path)
    }
}

/// Copies files into `<root>/<collection key>/`.
/// An existing file of the same name is never overwritten: placement fails
/// with `AlreadyExists` unless it is the very file being placed.
#[derive(Debug, Clone)]
pub struct CopyPlacer {
    root: PathBuf,
}

impl CopyPlacer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl MediaPlacer for CopyPlacer {
    fn place(&self, file: &Path, collection_key: &str) -> io::Result<PathBuf> {
        let file_name = file.file_name().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("{} has no file name", file.display()))
        })?;

        let folder = self.root.join(collection_key);
        fs::create_dir_all(&folder)?;
        let destination = folder.join(file_name);

        // Already in place: nothing to copy
        let same_file = match (fs::canonicalize(file), fs::canonicalize(&destination)) {
            (Ok(source), Ok(target)) => source == target,
            _ => false,
        };
        if same_file {
            return Ok(destination);
        }

        let mut source = File::open(file)?;
        let mut target = OpenOptions::new().write(true).create_new(true).open(&destination)?;
        if let Err(e) = io::copy(&mut source, &mut target) {
            drop(target);
            if let Err(cleanup) = fs::remove_file(&destination) {
                warn!("Could not remove partial copy {}: {}", destination.display(), cleanup);
            }
            return Err(e);
        }
        debug!("Copied {} to {}", file.display(), destination.display());
        Ok(destination)
    }
}
