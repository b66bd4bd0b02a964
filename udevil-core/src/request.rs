//! The `Request` value described in the data model: one mount or unmount
//! operation, before classification or policy evaluation.

use std::path::PathBuf;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Mount,
    Unmount,
}

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub operation: Option<Operation>,
    /// Device path, file path, directory, or URL as supplied by the caller.
    pub target: Option<String>,
    pub mount_point: Option<PathBuf>,
    pub fstype: Option<String>,
    pub options: Option<String>,
    pub label: Option<String>,
    pub uuid: Option<String>,
    /// Unmount only.
    pub force: bool,
    /// Unmount only.
    pub lazy: bool,
}

impl Request {
    pub fn new(operation: Operation) -> Self {
        Request {
            operation: Some(operation),
            ..Default::default()
        }
    }

    /// Validates the cross-field invariants from the data model: at least
    /// one of target/mount_point must be present; force/lazy only make
    /// sense on unmount.
    pub fn validate(&self) -> Result<()> {
        let operation = self
            .operation
            .ok_or_else(|| CoreError::InvalidArgument("operation not set".to_string()))?;

        if self.target.is_none() && self.mount_point.is_none() {
            return Err(CoreError::InvalidArgument(
                "at least one of target or mount point must be given".to_string(),
            ));
        }

        if operation == Operation::Mount && (self.force || self.lazy) {
            return Err(CoreError::InvalidArgument(
                "force/lazy only apply to unmount".to_string(),
            ));
        }

        Ok(())
    }

    pub fn operation(&self) -> Operation {
        self.operation.expect("Request::validate was not called")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_target_and_mount_point() {
        let req = Request::new(Operation::Mount);
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_force_on_mount() {
        let mut req = Request::new(Operation::Mount);
        req.target = Some("/dev/sdb1".to_string());
        req.force = true;
        assert!(req.validate().is_err());
    }

    #[test]
    fn accepts_minimal_unmount_by_mount_point() {
        let mut req = Request::new(Operation::Unmount);
        req.mount_point = Some(PathBuf::from("/media/alice/USB"));
        assert!(req.validate().is_ok());
    }
}
