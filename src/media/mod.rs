/// Media file decoding module
///
/// This module handles:
/// - Walking MP4/MOV atoms to pull out embedded payloads (atom.rs)
/// - Reading the EXIF image description of JPEG photos (exif.rs)

pub mod atom;
pub mod exif;

pub use atom::{append_atom, locate, locate_in_file, locate_path, replace_atom, AtomPath, FourCc, PVAT};
