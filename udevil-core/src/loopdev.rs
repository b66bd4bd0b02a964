//! §4.6 loop-device lifecycle, to mount a `RegularFile`.
//!
//! Attachment always goes through `/dev/fd/<N>` rather than the
//! filesystem path a second time, closing the rename race the data model
//! calls out: the kernel sees the same inode the classifier authorized.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::pathutil::canonical::canonicalize_hardened;
use crate::sysutil::SystemUtility;

/// A triple: backing-file canonical path, loop device path, held file
/// descriptor. Detaches automatically on drop unless [`disarm`](Self::disarm)
/// was called, so a failure anywhere after attachment cannot leak an
/// attached loop device.
pub struct LoopAttachment<'a> {
    backing_file: PathBuf,
    loop_device: String,
    armed: bool,
    sysutil: &'a dyn SystemUtility,
}

impl<'a> LoopAttachment<'a> {
    /// Attaches `file` (already opened and race-checked by the classifier)
    /// to a freshly allocated loop device, via `/dev/fd/<N>`.
    pub fn attach(backing_file: &Path, file: &File, sysutil: &'a dyn SystemUtility) -> Result<Self> {
        let loop_device = sysutil.losetup_find_free()?;

        let fd_path = PathBuf::from(format!("/dev/fd/{}", file.as_raw_fd()));
        let recanonicalized = canonicalize_hardened(&fd_path.to_string_lossy())?;
        if recanonicalized != backing_file {
            return Err(CoreError::invalid_path(
                &fd_path,
                "held descriptor no longer refers to the authorized backing file",
            ));
        }

        sysutil.losetup_attach(&loop_device, &fd_path)?;

        Ok(LoopAttachment {
            backing_file: backing_file.to_path_buf(),
            loop_device,
            armed: true,
            sysutil,
        })
    }

    pub fn loop_device(&self) -> &str {
        &self.loop_device
    }

    pub fn backing_file(&self) -> &Path {
        &self.backing_file
    }

    /// Disarms the guard: the caller has taken responsibility for the
    /// loop device (the mount succeeded, or the guard is being converted
    /// into a longer-lived handle outside this scope).
    pub fn disarm(mut self) -> (String, PathBuf) {
        self.armed = false;
        (self.loop_device.clone(), self.backing_file.clone())
    }
}

impl Drop for LoopAttachment<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.sysutil.losetup_detach(&self.loop_device);
        }
    }
}

/// Queries whether `backing_file` currently has an attached loop device
/// (`losetup -j`), used by unmount resolution when the target is a file.
pub fn find_attached_loop(backing_file: &Path, sysutil: &dyn SystemUtility) -> Result<Option<String>> {
    sysutil.losetup_query(backing_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysutil::RecordingSystemUtility;
    use std::io::Write;

    #[test]
    fn attach_uses_dev_fd_path_not_filesystem_path_again() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "iso data").unwrap();
        let canonical = tmp.path().canonicalize().unwrap();

        let sysutil = RecordingSystemUtility::new();
        sysutil.queue_free_loop_device("/dev/loop7");

        let file = File::open(tmp.path()).unwrap();
        let attachment = LoopAttachment::attach(&canonical, &file, &sysutil).unwrap();
        assert_eq!(attachment.loop_device(), "/dev/loop7");

        let calls = sysutil.losetup_attach_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.to_string_lossy().starts_with("/dev/fd/"));
    }

    #[test]
    fn drop_without_disarm_detaches() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "iso data").unwrap();
        let canonical = tmp.path().canonicalize().unwrap();

        let sysutil = RecordingSystemUtility::new();
        sysutil.queue_free_loop_device("/dev/loop7");
        let file = File::open(tmp.path()).unwrap();
        {
            let _attachment = LoopAttachment::attach(&canonical, &file, &sysutil).unwrap();
        }
        assert_eq!(sysutil.losetup_detach_calls(), vec!["/dev/loop7".to_string()]);
    }

    #[test]
    fn disarm_prevents_detach_on_drop() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "iso data").unwrap();
        let canonical = tmp.path().canonicalize().unwrap();

        let sysutil = RecordingSystemUtility::new();
        sysutil.queue_free_loop_device("/dev/loop7");
        let file = File::open(tmp.path()).unwrap();
        let attachment = LoopAttachment::attach(&canonical, &file, &sysutil).unwrap();
        let (dev, _) = attachment.disarm();
        assert_eq!(dev, "/dev/loop7");
        assert!(sysutil.losetup_detach_calls().is_empty());
    }
}
