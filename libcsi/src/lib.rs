//! # libcsi — CSI node plugin for rclone-backed volumes
//!
//! `libcsi` implements the node side of the [Container Storage Interface][csi]
//! for volumes served by an external FUSE mount helper (`rclone`).  It
//! follows the RK8s conventions: Tokio async runtime, `tracing` for
//! observability, `thiserror` for structured errors.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `VolumeId`, capabilities, node requests. |
//! | [`error`] | [`CsiError`] enum covering all failure modes. |
//! | [`identity`] | [`CsiIdentity`] trait — plugin discovery & health. |
//! | [`node`] | [`CsiNode`] trait — publish, unpublish. |
//! | [`mount`] | OS mount-table probing and unmounting. |
//! | [`secret`] | Named secrets holding connection defaults. |
//! | [`backend`] | Storage backends (rclone). |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod error;
pub mod identity;
pub mod mount;
pub mod node;
pub mod secret;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::rclone::{RcloneBackend, RcloneConfig};
pub use error::{Code, CsiError};
pub use identity::CsiIdentity;
pub use node::CsiNode;
pub use types::*;
