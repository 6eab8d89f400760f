//! Core CSI types: volume identity, capabilities, node requests and plugin
//! metadata.
//!
//! All request types are [`Serialize`]/[`Deserialize`] so a publish request
//! can be handed to the node plugin as a JSON document.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Per-volume key/value configuration supplied by the orchestrator.
pub type VolumeContext = HashMap<String, String>;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Single-node read-write.
    ReadWriteOnce,
    /// Multi-node read-only.
    ReadOnlyMany,
    /// Multi-node read-write.
    ReadWriteMany,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Additional mount flags (e.g. `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
    /// Filesystem type, always `"rclone"` for this plugin.
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
}

fn default_fs_type() -> String {
    "rclone".to_owned()
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::ReadWriteMany,
            mount_flags: Vec::new(),
            fs_type: default_fs_type(),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to stage a volume on a node.
///
/// The rclone plugin mounts straight into the publish target, so staging is
/// accepted and otherwise ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    /// Volume to stage.
    pub volume_id: VolumeId,
    /// Global staging mount point.
    pub staging_target_path: String,
    /// Requested capability.
    #[serde(default)]
    pub volume_capability: VolumeCapability,
    /// Opaque per-volume context.
    #[serde(default)]
    pub volume_context: VolumeContext,
}

/// Request to publish (FUSE-mount) a volume at a Pod's target path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    #[serde(default)]
    pub volume_id: VolumeId,
    /// Target path the remote is mounted at,
    /// e.g. `/var/lib/kubelet/pods/<pod-uid>/volumes/<vol-name>/mount`.
    pub target_path: String,
    /// Requested capability.
    #[serde(default)]
    pub volume_capability: VolumeCapability,
    /// Whether the mount should be read-only.
    #[serde(default)]
    pub read_only: bool,
    /// Per-volume overrides: `remote`, `remotePath`, helper flags, ...
    #[serde(default)]
    pub volume_context: VolumeContext,
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"csi-rclone"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin.
///
/// Part of the backend-neutral [`CsiIdentity`](crate::CsiIdentity)
/// contract.  A node-only plugin such as the rclone backend advertises
/// none of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
    /// Plugin supports volume topology constraints.
    VolumeAccessibilityConstraints,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host, `0` for unlimited.
    pub max_volumes: u64,
}
