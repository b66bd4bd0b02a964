//! Component: external-utility invocation, abstracted the same way the
//! teacher abstracts kernel syscalls — one trait, a real subprocess-based
//! implementation, and a recording test double.

pub mod mock;
pub mod process;

use std::any::Any;
use std::path::Path;

use crate::error::Result;

pub use mock::RecordingSystemUtility;
pub use process::ProcessSystemUtility;

/// Paths to the external utilities the design names; each is
/// independently configurable, defaulting to the platform-conventional
/// location.
#[derive(Debug, Clone)]
pub struct UtilityPaths {
    pub mount: String,
    pub umount: String,
    pub losetup: String,
    pub setfacl: String,
}

impl Default for UtilityPaths {
    fn default() -> Self {
        UtilityPaths {
            mount: "/bin/mount".to_string(),
            umount: "/bin/umount".to_string(),
            losetup: "/sbin/losetup".to_string(),
            setfacl: "/usr/bin/setfacl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MountInvocation {
    pub source: String,
    pub target: Option<String>,
    pub fstype: Option<String>,
    pub options: Option<String>,
    pub verbose: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UnmountInvocation {
    pub source_or_target: String,
    pub force: bool,
    pub lazy: bool,
    pub detach_loop: bool,
}

/// Abstracts invocation of `mount`, `umount`, `losetup`, and `setfacl` as
/// subprocesses — never as in-process syscalls, per the design's
/// non-goal. One production implementation ([`ProcessSystemUtility`]) via
/// `std::process::Command`, one test double ([`RecordingSystemUtility`]).
pub trait SystemUtility {
    fn as_any(&self) -> &dyn Any;

    fn mount(&self, invocation: &MountInvocation) -> Result<()>;
    fn umount(&self, invocation: &UnmountInvocation) -> Result<()>;

    /// `mount -f -v <source>`: a "fake" mount that reports success iff the
    /// source is already known to the system (an `/etc/fstab` entry), used
    /// by the orchestrator's unprivileged fast path. Never actually mounts.
    fn mount_probe(&self, source: &str) -> Result<bool>;

    /// `losetup -f`: finds an unused loop device name.
    fn losetup_find_free(&self) -> Result<String>;
    /// `losetup <dev> <path>`: attaches, where `path` is always a
    /// `/dev/fd/<N>` descriptor path per the loop-device lifecycle design.
    fn losetup_attach(&self, loop_device: &str, backing_fd_path: &Path) -> Result<()>;
    /// `losetup -d <dev>`.
    fn losetup_detach(&self, loop_device: &str) -> Result<()>;
    /// `losetup -j <path>`: queries the loop device currently bound to a
    /// backing file, if any.
    fn losetup_query(&self, backing_file: &Path) -> Result<Option<String>>;
    /// `losetup -a`: enumerates all attached loop devices.
    fn losetup_list(&self) -> Result<Vec<(String, String)>>;

    /// `setfacl -m u:<user>:rx <dir>`.
    fn setfacl(&self, dir: &Path, username: &str) -> Result<()>;
}
