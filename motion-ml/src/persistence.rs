//! Atomic file persistence for snapshots, manifests, and prediction logs.
//!
//! Every on-disk artifact this crate owns goes through the write-to-tmp then
//! rename pattern so a crash mid-write never leaves a truncated file behind.

use crate::error::MotionError;
use std::path::Path;

/// Serialize `data` as pretty JSON and atomically replace `path` with it.
///
/// Parent directories are created as needed.
pub fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<(), MotionError> {
    let json = serde_json::to_string_pretty(data)?;
    write_bytes(path, json.as_bytes())
}

/// Atomically replace `path` with `data` via a `.tmp` sibling.
pub fn write_bytes(path: &Path, data: &[u8]) -> Result<(), MotionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and deserialize JSON from `path`, `Ok(None)` when the file is absent.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, MotionError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}
