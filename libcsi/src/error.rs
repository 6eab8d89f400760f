//! CSI error types.
//!
//! All errors in the `libcsi` crate are represented by the [`CsiError`] enum,
//! which derives [`thiserror::Error`] and [`Serialize`]/[`Deserialize`] so an
//! error can be reported verbatim to whatever drives the node service.
//! [`CsiError::code`] folds the variants onto the status codes a CSI caller
//! understands.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// CSI-facing status code of a failed call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Code {
    InvalidArgument,
    PermissionDenied,
    Cancelled,
    Internal,
}

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// The caller supplied an invalid argument, e.g. a missing `remote`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The node plugin lacks the rights to perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Preparing or performing a mount failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An unmount operation failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The mount helper could not be started, or exited unsuccessfully.
    #[error(
        "mounting failed, {outcome}: cmd: '{command}' remote: '{remote}' targetpath: {target} output: {output:?}"
    )]
    HelperFailed {
        command: String,
        remote: String,
        target: String,
        /// Classified exit of the helper process.
        outcome: String,
        /// Combined stdout/stderr captured from the helper.
        output: String,
    },

    /// The target never showed up in the mount table.
    #[error(
        "mounting timed-out after {attempts} checks: cmd: '{command}' remote: '{remote}' targetpath: {target}"
    )]
    MountTimeout {
        command: String,
        remote: String,
        target: String,
        attempts: u32,
    },

    /// The caller abandoned the request before it completed.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsiError {
    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Classify an I/O error raised while working on `path`.
    pub fn from_io(path: &Path, e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            Self::PermissionDenied(format!("{}: {e}", path.display()))
        } else {
            Self::MountFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        }
    }

    /// The status code reported to the CSI caller.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::PermissionDenied(_) => Code::PermissionDenied,
            Self::Cancelled(_) => Code::Cancelled,
            Self::MountFailed { .. }
            | Self::UnmountFailed { .. }
            | Self::HelperFailed { .. }
            | Self::MountTimeout { .. }
            | Self::Internal(_) => Code::Internal,
        }
    }
}
