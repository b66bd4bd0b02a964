//! Component G: the on-disk mount-table reader.
//!
//! Parses `/proc/self/mountinfo` via the `procfs` crate into a queryable
//! table, used by the unmount-resolution path and the "known to system
//! mount table" fast path.

use std::path::{Path, PathBuf};

use procfs::process::{MountInfo, Process};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone)]
pub struct MountTableEntry {
    pub source: String,
    pub mount_point: PathBuf,
    pub fstype: String,
}

#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountTableEntry>,
}

impl MountTable {
    pub fn from_self() -> Result<Self> {
        let mount_infos = Process::myself()
            .map_err(|e| CoreError::ResourceError(format!("reading /proc/self: {e}")))?
            .mountinfo()
            .map_err(|e| CoreError::ResourceError(format!("reading mountinfo: {e}")))?;
        Ok(Self::from_mount_infos(mount_infos.0))
    }

    pub fn from_mount_infos(mount_infos: Vec<MountInfo>) -> Self {
        let entries = mount_infos
            .into_iter()
            .map(|mi| MountTableEntry {
                source: mi.mount_source.unwrap_or_default(),
                mount_point: mi.mount_point,
                fstype: mi.fs_type,
            })
            .collect();
        MountTable { entries }
    }

    pub fn entries(&self) -> &[MountTableEntry] {
        &self.entries
    }

    pub fn is_mounted_at(&self, mount_point: &Path) -> bool {
        self.entries.iter().any(|e| e.mount_point == mount_point)
    }

    /// First entry whose source equals `source` exactly (a device path or
    /// a reconstructed network URL).
    pub fn find_by_source(&self, source: &str) -> Option<&MountTableEntry> {
        self.entries.iter().find(|e| e.source == source)
    }

    pub fn find_by_mount_point(&self, mount_point: &Path) -> Option<&MountTableEntry> {
        self.entries.iter().find(|e| e.mount_point == mount_point)
    }

    /// Loop devices currently bound to `backing_file`, matched by source
    /// path recorded as `/dev/loopN`, cross-referenced against a
    /// caller-supplied backing-file lookup (kept external because it goes
    /// through `losetup -j`, a [`SystemUtility`](crate::sysutil::SystemUtility) call, not this table).
    pub fn loop_entries(&self) -> impl Iterator<Item = &MountTableEntry> {
        self.entries.iter().filter(|e| e.source.starts_with("/dev/loop"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str, mount_point: &str, fstype: &str) -> MountTableEntry {
        MountTableEntry {
            source: source.to_string(),
            mount_point: PathBuf::from(mount_point),
            fstype: fstype.to_string(),
        }
    }

    #[test]
    fn is_mounted_at_checks_mount_point_only() {
        let table = MountTable {
            entries: vec![entry("/dev/sdb1", "/media/usb", "vfat")],
        };
        assert!(table.is_mounted_at(Path::new("/media/usb")));
        assert!(!table.is_mounted_at(Path::new("/media/other")));
    }

    #[test]
    fn find_by_source_matches_exact_device() {
        let table = MountTable {
            entries: vec![entry("/dev/sdb1", "/media/usb", "vfat")],
        };
        assert!(table.find_by_source("/dev/sdb1").is_some());
        assert!(table.find_by_source("/dev/sdb2").is_none());
    }

    #[test]
    fn loop_entries_filters_by_source_prefix() {
        let table = MountTable {
            entries: vec![
                entry("/dev/loop3", "/media/iso", "iso9660"),
                entry("/dev/sdb1", "/media/usb", "vfat"),
            ],
        };
        assert_eq!(table.loop_entries().count(), 1);
    }
}
