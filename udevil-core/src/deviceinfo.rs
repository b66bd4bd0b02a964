//! The device-info collaborator interface (external per the design, but
//! given one real implementation here: a crate with only trait definitions
//! and no implementation cannot be exercised end-to-end).

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionInterface {
    Ata,
    Scsi,
    Usb,
    Firewire,
    Sdio,
    Platform,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionScheme {
    Mbr,
    Gpt,
    Unknown,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    pub canonical_path: PathBuf,
    pub major: u32,
    pub minor: u32,
    pub label: Option<String>,
    pub uuid: Option<String>,
    pub fstype: Option<String>,
    pub current_mount_points: Vec<PathBuf>,
    pub system_internal: bool,
    pub media_available: bool,
    pub by_id_link: Option<PathBuf>,
    pub partition_scheme: Option<PartitionScheme>,
    pub partition_number: Option<u32>,
    pub connection_interface: Option<ConnectionInterface>,
    pub removable: bool,
}

/// Given either a device number or a sysfs path, produces a
/// [`DeviceSnapshot`]. The classifier consumes this trait; it never reads
/// sysfs itself.
pub trait DeviceInfo {
    fn snapshot_by_devnum(&self, major: u32, minor: u32) -> Result<DeviceSnapshot>;
    fn snapshot_by_path(&self, device_path: &Path) -> Result<DeviceSnapshot>;
}

/// Reads the subset of sysfs attributes the design requires. Hotplug
/// monitoring and udev database enrichment are out of scope and not
/// implemented here.
#[derive(Debug, Default)]
pub struct SysfsDeviceInfo;

impl SysfsDeviceInfo {
    pub fn new() -> Self {
        SysfsDeviceInfo
    }

    fn read_attr(sys_block_dir: &Path, attr: &str) -> Option<String> {
        fs::read_to_string(sys_block_dir.join(attr))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl DeviceInfo for SysfsDeviceInfo {
    fn snapshot_by_devnum(&self, major: u32, minor: u32) -> Result<DeviceSnapshot> {
        let sys_path = PathBuf::from(format!("/sys/dev/block/{major}:{minor}"));
        if !sys_path.exists() {
            return Err(CoreError::Classification(format!(
                "no sysfs entry for device {major}:{minor}"
            )));
        }
        self.snapshot_from_sysfs(&sys_path, major, minor)
    }

    fn snapshot_by_path(&self, device_path: &Path) -> Result<DeviceSnapshot> {
        let metadata = fs::metadata(device_path)
            .map_err(|e| CoreError::Classification(format!("stat {}: {e}", device_path.display())))?;
        use std::os::linux::fs::MetadataExt;
        let rdev = metadata.st_rdev();
        let major = unsafe { libc::major(rdev) };
        let minor = unsafe { libc::minor(rdev) };
        let sys_path = PathBuf::from(format!("/sys/dev/block/{major}:{minor}"));
        self.snapshot_from_sysfs(&sys_path, major, minor)
    }
}

impl SysfsDeviceInfo {
    fn snapshot_from_sysfs(&self, sys_path: &Path, major: u32, minor: u32) -> Result<DeviceSnapshot> {
        let devname = Self::read_attr(sys_path, "../../../uevent")
            .and_then(|uevent| {
                uevent
                    .lines()
                    .find_map(|l| l.strip_prefix("DEVNAME=").map(str::to_string))
            })
            .unwrap_or_default();
        let canonical_path = if devname.is_empty() {
            PathBuf::from(format!("/dev/block/{major}:{minor}"))
        } else {
            PathBuf::from("/dev").join(devname)
        };

        let removable = Self::read_attr(sys_path, "removable")
            .map(|v| v.trim() == "1")
            .unwrap_or(false);

        Ok(DeviceSnapshot {
            canonical_path,
            major,
            minor,
            label: Self::read_attr(sys_path, "label"),
            uuid: Self::read_attr(sys_path, "uuid"),
            fstype: Self::read_attr(sys_path, "type"),
            current_mount_points: Vec::new(),
            system_internal: !removable,
            media_available: true,
            by_id_link: None,
            partition_scheme: None,
            partition_number: Self::read_attr(sys_path, "partition").and_then(|p| p.parse().ok()),
            connection_interface: None,
            removable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_not_internal_and_has_no_mounts() {
        let snap = DeviceSnapshot::default();
        assert!(snap.current_mount_points.is_empty());
        assert!(!snap.system_internal);
    }
}
