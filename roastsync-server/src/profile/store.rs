//! Profile files on disk
//!
//! Uploaded profiles are mirrored to `<profiles_dir>/<roast_id>.alog`.
//! Older deployments wrote the upper-case `.ALOG` extension; both are read.

use super::{decode_profile, Document, ProfileError};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

const EXTENSIONS: [&str; 2] = ["alog", "ALOG"];

/// Existing legacy file for a roast, if any
pub fn legacy_path(profiles_dir: &Path, roast_id: Uuid) -> Option<PathBuf> {
    EXTENSIONS
        .iter()
        .map(|ext| profiles_dir.join(format!("{}.{}", roast_id, ext)))
        .find(|path| path.is_file())
}

/// Decode a profile file
pub fn read_profile_file(path: &Path) -> Result<Document, ProfileError> {
    let bytes = std::fs::read(path)?;
    decode_profile(&bytes)
}

/// Decode a stored blob through a scratch file that is removed afterwards
pub fn decode_via_scratch(blob: &[u8]) -> Result<Document, ProfileError> {
    let mut scratch = tempfile::Builder::new()
        .prefix("roast_")
        .suffix(".alog")
        .tempfile()?;
    scratch.write_all(blob)?;
    scratch.flush()?;
    read_profile_file(scratch.path())
}

/// Write the legacy copy of an uploaded profile
pub fn write_legacy(profiles_dir: &Path, roast_id: Uuid, bytes: &[u8]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(profiles_dir)?;
    let path = profiles_dir.join(format!("{}.alog", roast_id));
    std::fs::write(&path, bytes)?;
    info!("Saved profile file for roast {} at {}", roast_id, path.display());
    Ok(path)
}

/// Raw bytes of the legacy file, if any
pub fn read_legacy_bytes(profiles_dir: &Path, roast_id: Uuid) -> std::io::Result<Option<Vec<u8>>> {
    match legacy_path(profiles_dir, roast_id) {
        Some(path) => std::fs::read(path).map(Some),
        None => Ok(None),
    }
}
