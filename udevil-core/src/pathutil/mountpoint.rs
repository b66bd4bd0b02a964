//! Component D (part 2): mount-point selection, naming, and directory
//! creation.

use std::fs::{self, DirBuilder};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::Uid;

use crate::error::{CoreError, Result};
use crate::marker;
use crate::mounttable::MountTable;
use crate::sysutil::SystemUtility;

const DEFAULT_MOUNT_POINT_MODE: u32 = 0o755;
const MAX_NAME_COMPONENT_LEN: usize = 30;

/// Validates a user-supplied explicit mount point: it must be a directory,
/// not a symlink, not already mounted, and owned by either root or the
/// caller.
pub fn validate_explicit_mount_point(path: &Path, caller_uid: Uid, mount_table: &MountTable) -> Result<()> {
    let symlink_meta = fs::symlink_metadata(path)
        .map_err(|e| CoreError::invalid_path(path, format!("cannot stat: {e}")))?;
    if symlink_meta.file_type().is_symlink() {
        return Err(CoreError::invalid_path(path, "mount point must not be a symlink"));
    }
    if !symlink_meta.is_dir() {
        return Err(CoreError::invalid_path(path, "mount point must be a directory"));
    }
    if mount_table.is_mounted_at(path) {
        return Err(CoreError::AlreadyMounted(path.display().to_string()));
    }
    let owner = symlink_meta.uid();
    if owner != 0 && owner != caller_uid.as_raw() {
        return Err(CoreError::invalid_path(
            path,
            "mount point must be owned by root or the caller",
        ));
    }
    Ok(())
}

/// Picks the first entry of `allowed_media_dirs` (already scoped by
/// filesystem type by the caller) that exists and is accessible.
pub fn first_accessible_media_dir<'a>(candidates: impl Iterator<Item = &'a str>) -> Option<PathBuf> {
    candidates
        .map(|c| PathBuf::from(c.trim()))
        .find(|p| p.is_dir())
}

/// Ensures the conventional per-user directory `/run/media/<username>`
/// exists, created on demand with ACL `u:<username>:rx`, falling back to
/// mode 0755 if ACL setup fails. Parent directories are created with mode
/// 0755, owned by root. Must run while elevated.
pub fn ensure_per_user_media_dir(
    username: &str,
    sysutil: &dyn SystemUtility,
) -> Result<PathBuf> {
    let run_media = Path::new("/run/media");
    if !run_media.exists() {
        DirBuilder::new()
            .mode(0o755)
            .create(run_media)
            .map_err(|e| CoreError::ResourceError(format!("creating /run/media: {e}")))?;
    }

    let user_dir = run_media.join(username);
    if !user_dir.exists() {
        DirBuilder::new()
            .mode(0o755)
            .create(&user_dir)
            .map_err(|e| CoreError::ResourceError(format!("creating {}: {e}", user_dir.display())))?;
        if sysutil.setfacl(&user_dir, username).is_err() {
            let mut perms = fs::metadata(&user_dir)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&user_dir, perms)?;
        }
    }

    Ok(user_dir)
}

/// Sanitizes a candidate mount-point name component: rejects characters
/// that would be invalid in a path component rather than escaping them.
fn sanitize_name_component(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if raw.chars().any(|c| c == '/' || c == '\0' || c.is_control()) {
        return None;
    }
    Some(raw.to_string())
}

/// Derives a mount-point directory name for a classified device, in
/// priority order: label, by-id basename, basename+UUID, bare basename.
pub fn device_mount_point_name(
    label: Option<&str>,
    by_id_link: Option<&Path>,
    basename: &str,
    uuid: Option<&str>,
) -> Option<String> {
    if let Some(label) = label {
        if let Some(sanitized) = sanitize_name_component(label) {
            if !sanitized.is_empty() {
                return Some(sanitized);
            }
        }
    }
    if let Some(link) = by_id_link {
        if let Some(name) = link.file_name().and_then(|n| n.to_str()) {
            if let Some(sanitized) = sanitize_name_component(name) {
                return Some(sanitized);
            }
        }
    }
    if let Some(uuid) = uuid {
        let combined = format!("{basename}-{uuid}");
        if let Some(sanitized) = sanitize_name_component(&combined) {
            return Some(sanitized);
        }
    }
    sanitize_name_component(basename)
}

/// Derives a mount-point directory name for a network share:
/// `<scheme>-<host>[-<path-derived>]`, trimmed to <= 30 chars.
pub fn network_mount_point_name(scheme: &str, host: &str, remote_path: &str) -> Option<String> {
    let host_component = sanitize_name_component(host)?;
    let mut name = format!("{scheme}-{host_component}");

    let path_component = remote_path.trim_matches('/').replace('/', "-");
    if !path_component.is_empty() {
        let sanitized = sanitize_name_component(&path_component)?;
        name.push('-');
        name.push_str(&sanitized);
    }

    if name.len() > MAX_NAME_COMPONENT_LEN {
        name.truncate(MAX_NAME_COMPONENT_LEN);
    }
    Some(name)
}

/// Joins a single sanitized name component under `parent`, clamping any
/// `..` the component might still contain (e.g. a bare `..` label, which
/// `sanitize_name_component` lets through since it has no `/`) so the
/// chosen mount point can never land outside the allowed media directory.
fn join_under_parent(parent: &Path, component: &str) -> PathBuf {
    safe_path::scoped_join(parent, component).unwrap_or_else(|_| parent.join(component))
}

/// If `preferred` already exists under `parent` and is not the caller's
/// mount point, append `-2`, `-3`, … until an unused or reusable name is
/// found.
pub fn disambiguate_name(parent: &Path, preferred: &str, caller_uid: Uid) -> PathBuf {
    let candidate = join_under_parent(parent, preferred);
    if !candidate.exists() || is_reusable(&candidate, caller_uid) {
        return candidate;
    }
    let mut n = 2;
    loop {
        let candidate = join_under_parent(parent, &format!("{preferred}-{n}"));
        if !candidate.exists() || is_reusable(&candidate, caller_uid) {
            return candidate;
        }
        n += 1;
    }
}

fn is_reusable(path: &Path, caller_uid: Uid) -> bool {
    marker::is_core_created(path)
        && fs::metadata(path)
            .map(|m| m.uid() == 0 || m.uid() == caller_uid.as_raw())
            .unwrap_or(false)
}

/// Creates `mount_point` with mode 0700 while elevated, then writes the
/// ownership marker inside it.
pub fn create_mount_point_dir(mount_point: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(mount_point)
        .map_err(|e| CoreError::ResourceError(format!("creating {}: {e}", mount_point.display())))?;
    marker::create_marker(mount_point)
}

/// Applies the configured `mount_point_mode` (default 0755) after a
/// successful mount.
pub fn finalize_mount_point_mode(mount_point: &Path, configured_mode: Option<u32>) -> Result<()> {
    let mode = configured_mode.unwrap_or(DEFAULT_MOUNT_POINT_MODE);
    let mut perms = fs::metadata(mount_point)?.permissions();
    perms.set_mode(mode);
    fs::set_permissions(mount_point, perms)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_prefers_label_over_basename() {
        let name = device_mount_point_name(Some("USB KEY"), None, "sdb1", None);
        assert_eq!(name.as_deref(), Some("USB KEY"));
    }

    #[test]
    fn device_name_falls_back_to_basename() {
        let name = device_mount_point_name(None, None, "sdb1", None);
        assert_eq!(name.as_deref(), Some("sdb1"));
    }

    #[test]
    fn rejects_name_with_embedded_slash() {
        assert_eq!(device_mount_point_name(Some("bad/name"), None, "sdb1", None), Some("sdb1".to_string()));
    }

    #[test]
    fn network_name_combines_scheme_host_and_path_trimmed() {
        let name = network_mount_point_name("cifs", "fileserver", "/very/long/remote/path/that/exceeds/thirty/chars").unwrap();
        assert!(name.len() <= MAX_NAME_COMPONENT_LEN);
        assert!(name.starts_with("cifs-fileserver"));
    }

    #[test]
    fn disambiguate_appends_suffix_when_taken_by_someone_else() {
        let tmp = tempfile::tempdir().unwrap();
        let taken = tmp.path().join("usb");
        fs::create_dir(&taken).unwrap();
        // no marker -> not reusable, so -2 should be picked
        let chosen = disambiguate_name(tmp.path(), "usb", Uid::from_raw(1000));
        assert_eq!(chosen, tmp.path().join("usb-2"));
    }

    #[test]
    fn disambiguate_clamps_dotdot_component_under_parent() {
        // A bare ".." label has no '/' and survives `sanitize_name_component`,
        // so the join itself must refuse to escape `parent`.
        let tmp = tempfile::tempdir().unwrap();
        let chosen = disambiguate_name(tmp.path(), "..", Uid::from_raw(1000));
        assert!(chosen.starts_with(tmp.path()));
    }
}
