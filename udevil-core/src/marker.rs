//! The mount-point marker: a zero-byte, root-owned file named
//! `.udevil-mount-point` inside every core-created mount directory.
//! Presence plus root ownership is the entire contract with the
//! out-of-scope cleanup collaborator, and the sole evidence that the core
//! (not the administrator) created the directory.

use std::fs::{self, OpenOptions};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::error::{CoreError, Result};

pub const MARKER_FILE_NAME: &str = ".udevil-mount-point";

/// Creates the marker file inside `mount_point`. Must be called while
/// elevated: the marker is owned by root, mode 0644.
pub fn create_marker(mount_point: &Path) -> Result<()> {
    let marker_path = mount_point.join(MARKER_FILE_NAME);
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&marker_path)
        .map_err(|e| CoreError::ResourceError(format!("creating marker {}: {e}", marker_path.display())))?;

    let mut perms = fs::metadata(&marker_path)?.permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o644);
    fs::set_permissions(&marker_path, perms)?;

    Ok(())
}

/// True iff `mount_point` contains a marker file owned by root, i.e. the
/// directory was created by this core and may later be removed.
pub fn is_core_created(mount_point: &Path) -> bool {
    let marker_path = mount_point.join(MARKER_FILE_NAME);
    match fs::metadata(&marker_path) {
        Ok(meta) => meta.is_file() && meta.uid() == 0,
        Err(_) => false,
    }
}

/// Removes the marker file and then the (now-empty) directory. Used on
/// mount-syscall failure rollback, and is a no-op if the marker is absent.
pub fn remove_marker_and_dir(mount_point: &Path) -> Result<()> {
    let marker_path = mount_point.join(MARKER_FILE_NAME);
    if marker_path.exists() {
        fs::remove_file(&marker_path)?;
    }
    if mount_point.exists() {
        fs::remove_dir(mount_point)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_absent_means_not_core_created() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_core_created(tmp.path()));
    }

    #[test]
    fn remove_marker_and_dir_removes_empty_dir_without_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("untouched");
        fs::create_dir(&dir).unwrap();
        remove_marker_and_dir(&dir).unwrap();
        assert!(!dir.exists());
    }
}
