//! The error taxonomy returned by every public operation in this crate.
//!
//! Each variant corresponds to one of the error kinds named in the design:
//! `InvariantBroken`, `InvalidArgument`, `InvalidPath`, `Classification`,
//! `PolicyDenied`, `AlreadyMounted`, `NotMounted`, `ExternalFailure`,
//! `ResourceError`, `Interrupted`. [`CoreError::exit_code`] maps them onto
//! the process exit codes a front-end should use.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invariant broken: {0}")]
    InvariantBroken(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("could not classify target: {0}")]
    Classification(String),

    #[error("policy denied by category `{category}`: {reason}")]
    PolicyDenied { category: String, reason: String },

    #[error("{0} is already mounted")]
    AlreadyMounted(String),

    #[error("{0} is not mounted")]
    NotMounted(String),

    #[error("external utility `{utility}` failed (exit {exit_code:?}): {stderr}")]
    ExternalFailure {
        utility: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("resource error: {0}")]
    ResourceError(String),

    #[error("interrupted by signal")]
    Interrupted,
}

impl CoreError {
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        CoreError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn policy_denied(category: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::PolicyDenied {
            category: category.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code per the external-interfaces contract: 0 success, 1
    /// usage/non-policy failure, 2 policy denial, 130 interrupted.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::PolicyDenied { .. } => 2,
            CoreError::Interrupted => 130,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::ResourceError(err.to_string())
    }
}

impl From<nix::Error> for CoreError {
    fn from(err: nix::Error) -> Self {
        CoreError::ResourceError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
