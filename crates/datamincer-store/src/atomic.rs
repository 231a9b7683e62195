use std::fs::{OpenOptions, create_dir_all};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::errors::{StoreError, StoreResult};

/// Serializes `value` as JSON and replaces `path` with it in one rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let data = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &data)
}

/// Writes `data` to a sibling temp file, syncs it, then renames it over `path`.
pub fn write_bytes_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    let parent = path.parent().filter(|parent| !parent.as_os_str().is_empty());
    if let Some(parent) = parent {
        create_dir_all(parent)?;
    }

    let tmp_path = temp_path(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    std::fs::rename(&tmp_path, path)?;
    if let Some(parent) = parent {
        sync_dir(parent)?;
    }

    Ok(())
}

/// Copies a file into place through the same temp-and-rename sequence.
pub fn copy_file_atomic(source: &Path, path: &Path) -> StoreResult<()> {
    let data = std::fs::read(source)?;
    write_bytes_atomic(path, &data)
}

fn temp_path(path: &Path) -> StoreResult<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| StoreError::Invalid(format!("invalid path for atomic write: {}", path.display())))?;
    let tmp_name = format!(".{}.tmp", file_name.to_string_lossy());
    Ok(path.with_file_name(tmp_name))
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(path)?;
    dir.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
