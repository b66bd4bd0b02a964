//! Parses the on-disk policy configuration into a [`PolicySnapshot`].
//!
//! Syntax: one `key = value` assignment per line; blank lines and lines
//! starting with `#` are ignored; a duplicate key for the same category
//! is an error. `$USER`, `$UID`, `$GID` expand against the caller's
//! identity; `$KNOWN_FILESYSTEMS` expands against a built-in list merged
//! with `/proc/filesystems` (falling back silently if that file cannot be
//! read). Expansion happens exactly once, here, not at match time.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use nix::unistd::{Gid, Uid};

use crate::error::{CoreError, Result};

const BUILTIN_KNOWN_FILESYSTEMS: &[&str] =
    &["vfat", "ext2", "ext3", "ext4", "ntfs", "iso9660", "udf", "exfat", "btrfs", "xfs"];

#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    /// Raw `key` (including any `_<type-scope>` suffix) -> value, exactly
    /// as it appeared in the file after variable expansion.
    entries: HashMap<String, String>,
}

impl PolicySnapshot {
    pub fn from_str(contents: &str, caller_uid: Uid, caller_gid: Gid, username: &str) -> Result<Self> {
        let mut entries = HashMap::new();
        let known_filesystems = known_filesystems();

        for (lineno, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(eq) = line.find('=') else {
                return Err(CoreError::ResourceError(format!(
                    "policy config line {}: syntax error: {}",
                    lineno + 1,
                    raw_line
                )));
            };
            let key = line[..eq].trim().to_string();
            let mut value = line[eq + 1..].trim().to_string();
            if key.is_empty() {
                return Err(CoreError::ResourceError(format!(
                    "policy config line {}: empty key",
                    lineno + 1
                )));
            }
            if entries.contains_key(&key) {
                return Err(CoreError::ResourceError(format!(
                    "policy config line {}: duplicate assignment for {}",
                    lineno + 1,
                    key
                )));
            }

            if key.starts_with("allowed_media_dirs")
                || key.starts_with("allowed_options")
                || key.starts_with("default_options")
            {
                value = value.replace("$USER", username);
                value = value.replace("$UID", &caller_uid.to_string());
                value = value.replace("$GID", &caller_gid.to_string());
            } else if key.starts_with("allowed_types") {
                if value == "*" {
                    value = format!("$KNOWN_FILESYSTEMS,smbfs,cifs,nfs,ftpfs,curlftpfs,sshfs,file,tmpfs,ramfs");
                }
                value = value.replace("$KNOWN_FILESYSTEMS", &known_filesystems);
            }

            entries.insert(key, value);
        }

        Ok(PolicySnapshot { entries })
    }

    pub fn from_file(path: &Path, caller_uid: Uid, caller_gid: Gid, username: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| CoreError::ResourceError(format!("reading {}: {}", path.display(), e)))?;
        Self::from_str(&contents, caller_uid, caller_gid, username)
    }

    /// category_<type-scope> first, falling back to bare category.
    pub fn lookup(&self, category: &str, type_scope: Option<&str>) -> Option<&str> {
        if let Some(ty) = type_scope {
            let scoped = format!("{category}_{ty}");
            if let Some(v) = self.entries.get(&scoped) {
                return Some(v);
            }
        }
        self.entries.get(category).map(String::as_str)
    }

    pub fn contains_key(&self, category: &str) -> bool {
        self.entries.contains_key(category)
    }
}

fn known_filesystems() -> String {
    let mut set: Vec<String> = BUILTIN_KNOWN_FILESYSTEMS.iter().map(|s| s.to_string()).collect();
    if let Ok(contents) = fs::read_to_string("/proc/filesystems") {
        for line in contents.lines() {
            let fstype = line.trim_start_matches("nodev").trim();
            if !fstype.is_empty() && !set.iter().any(|s| s == fstype) {
                set.push(fstype.to_string());
            }
        }
    }
    set.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(src: &str) -> PolicySnapshot {
        PolicySnapshot::from_str(src, Uid::from_raw(1000), Gid::from_raw(1000), "alice").unwrap()
    }

    #[test]
    fn expands_user_uid_gid_in_media_dirs() {
        let snap = snapshot("allowed_media_dirs = /media/$USER,/run/media/$USER\n");
        assert_eq!(
            snap.lookup("allowed_media_dirs", None),
            Some("/media/alice,/run/media/alice")
        );
    }

    #[test]
    fn type_scope_falls_back_to_bare_category() {
        let snap = snapshot("allowed_types = vfat,ext4\n");
        assert_eq!(snap.lookup("allowed_types", Some("vfat")), Some("vfat,ext4"));
    }

    #[test]
    fn type_scope_key_wins_over_bare() {
        let snap = snapshot("allowed_users = alice\nallowed_users_vfat = bob\n");
        assert_eq!(snap.lookup("allowed_users", Some("vfat")), Some("bob"));
        assert_eq!(snap.lookup("allowed_users", Some("ext4")), Some("alice"));
    }

    #[test]
    fn rejects_duplicate_key() {
        let err = PolicySnapshot::from_str(
            "allowed_types = vfat\nallowed_types = ext4\n",
            Uid::from_raw(1000),
            Gid::from_raw(1000),
            "alice",
        );
        assert!(err.is_err());
    }

    #[test]
    fn rejects_syntax_error_line() {
        let err = PolicySnapshot::from_str(
            "this line has no equals sign\n",
            Uid::from_raw(1000),
            Gid::from_raw(1000),
            "alice",
        );
        assert!(err.is_err());
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let snap = snapshot("# a comment\n\nallowed_types = vfat\n");
        assert_eq!(snap.lookup("allowed_types", None), Some("vfat"));
    }
}
