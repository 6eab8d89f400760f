//! CSI Node service trait.
//!
//! The Node service runs on each worker node and makes a volume available
//! to Pod containers:
//!
//! 1. **Publish** — mount the volume at the Pod's target path.
//! 2. **Unpublish** — tear that mount down again.
//!
//! Stage and unstage exist for protocol completeness; backends that mount
//! directly into the target path accept them as no-ops.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::CsiError;
use crate::types::{NodeInfo, NodePublishVolumeRequest, NodeStageVolumeRequest, VolumeId};

/// Node service — local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume at the global staging path.
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError>;

    /// Unstage a volume from the global staging path.
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError>;

    /// Publish a volume at `req.target_path`.
    ///
    /// This is idempotent — calling it again for an already mounted
    /// `target_path` succeeds without mounting twice.  Cancelling `cancel`
    /// aborts a pending readiness wait with [`CsiError::Cancelled`].
    async fn publish_volume(
        &self,
        req: NodePublishVolumeRequest,
        cancel: CancellationToken,
    ) -> Result<(), CsiError>;

    /// Unpublish a volume: unmount `target_path`.
    ///
    /// This is idempotent.
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;
}
