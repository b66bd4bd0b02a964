//! Test double recording every invocation for assertions, in the shape of
//! the teacher's `TestHelperSyscall`: a `RefCell`-guarded call log per
//! operation, with an injectable canned failure.

use std::any::Any;
use std::cell::RefCell;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

use super::{MountInvocation, SystemUtility, UnmountInvocation};

#[derive(Default)]
pub struct RecordingSystemUtility {
    mounts: RefCell<Vec<MountInvocation>>,
    unmounts: RefCell<Vec<UnmountInvocation>>,
    losetup_attaches: RefCell<Vec<(String, PathBuf)>>,
    losetup_detaches: RefCell<Vec<String>>,
    setfacl_calls: RefCell<Vec<(PathBuf, String)>>,
    next_free_loop: RefCell<Vec<String>>,
    loop_query_answers: RefCell<std::collections::HashMap<PathBuf, String>>,
    fail_mount: RefCell<Option<CoreError>>,
    fail_losetup_attach: RefCell<Option<CoreError>>,
    known_sources: RefCell<Vec<String>>,
}

impl RecordingSystemUtility {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_free_loop_device(&self, name: impl Into<String>) {
        self.next_free_loop.borrow_mut().push(name.into());
    }

    pub fn set_loop_query_answer(&self, backing_file: impl Into<PathBuf>, loop_device: impl Into<String>) {
        self.loop_query_answers
            .borrow_mut()
            .insert(backing_file.into(), loop_device.into());
    }

    pub fn fail_next_mount(&self, err: CoreError) {
        *self.fail_mount.borrow_mut() = Some(err);
    }

    pub fn fail_next_losetup_attach(&self, err: CoreError) {
        *self.fail_losetup_attach.borrow_mut() = Some(err);
    }

    /// Marks `source` as already known to the system mount table, so
    /// `mount_probe` reports it as found (the unprivileged fast path).
    pub fn mark_known(&self, source: impl Into<String>) {
        self.known_sources.borrow_mut().push(source.into());
    }

    pub fn mount_calls(&self) -> Vec<MountInvocation> {
        self.mounts.borrow().clone()
    }

    pub fn unmount_calls(&self) -> Vec<UnmountInvocation> {
        self.unmounts.borrow().clone()
    }

    pub fn losetup_attach_calls(&self) -> Vec<(String, PathBuf)> {
        self.losetup_attaches.borrow().clone()
    }

    pub fn losetup_detach_calls(&self) -> Vec<String> {
        self.losetup_detaches.borrow().clone()
    }

    pub fn setfacl_calls(&self) -> Vec<(PathBuf, String)> {
        self.setfacl_calls.borrow().clone()
    }
}

impl SystemUtility for RecordingSystemUtility {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn mount(&self, invocation: &MountInvocation) -> Result<()> {
        if let Some(err) = self.fail_mount.borrow_mut().take() {
            return Err(err);
        }
        self.mounts.borrow_mut().push(invocation.clone());
        Ok(())
    }

    fn mount_probe(&self, source: &str) -> Result<bool> {
        Ok(self.known_sources.borrow().iter().any(|s| s == source))
    }

    fn umount(&self, invocation: &UnmountInvocation) -> Result<()> {
        self.unmounts.borrow_mut().push(invocation.clone());
        Ok(())
    }

    fn losetup_find_free(&self) -> Result<String> {
        self.next_free_loop
            .borrow_mut()
            .pop()
            .ok_or_else(|| CoreError::ResourceError("no free loop device queued in test".to_string()))
    }

    fn losetup_attach(&self, loop_device: &str, backing_fd_path: &Path) -> Result<()> {
        if let Some(err) = self.fail_losetup_attach.borrow_mut().take() {
            return Err(err);
        }
        self.losetup_attaches
            .borrow_mut()
            .push((loop_device.to_string(), backing_fd_path.to_path_buf()));
        Ok(())
    }

    fn losetup_detach(&self, loop_device: &str) -> Result<()> {
        self.losetup_detaches.borrow_mut().push(loop_device.to_string());
        Ok(())
    }

    fn losetup_query(&self, backing_file: &Path) -> Result<Option<String>> {
        Ok(self.loop_query_answers.borrow().get(backing_file).cloned())
    }

    fn losetup_list(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .losetup_attaches
            .borrow()
            .iter()
            .map(|(dev, path)| (dev.clone(), path.display().to_string()))
            .collect())
    }

    fn setfacl(&self, dir: &Path, username: &str) -> Result<()> {
        self.setfacl_calls
            .borrow_mut()
            .push((dir.to_path_buf(), username.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_mount_invocations() {
        let util = RecordingSystemUtility::new();
        util.mount(&MountInvocation {
            source: "/dev/sdb1".to_string(),
            target: Some("/media/usb".to_string()),
            fstype: Some("vfat".to_string()),
            options: None,
            verbose: false,
        })
        .unwrap();
        assert_eq!(util.mount_calls().len(), 1);
        assert_eq!(util.mount_calls()[0].source, "/dev/sdb1");
    }

    #[test]
    fn injected_mount_failure_is_returned_once() {
        let util = RecordingSystemUtility::new();
        util.fail_next_mount(CoreError::ResourceError("boom".to_string()));
        let invocation = MountInvocation {
            source: "/dev/sdb1".to_string(),
            ..Default::default()
        };
        assert!(util.mount(&invocation).is_err());
        assert!(util.mount(&invocation).is_ok());
        assert_eq!(util.mount_calls().len(), 1);
    }

    #[test]
    fn losetup_find_free_drains_the_queue() {
        let util = RecordingSystemUtility::new();
        util.queue_free_loop_device("/dev/loop3");
        assert_eq!(util.losetup_find_free().unwrap(), "/dev/loop3");
        assert!(util.losetup_find_free().is_err());
    }
}
