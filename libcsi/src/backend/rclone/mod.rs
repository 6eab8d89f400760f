//! rclone storage backend for CSI.
//!
//! [`RcloneBackend`] implements [`CsiIdentity`] and [`CsiNode`] by running
//! the `rclone` mount helper as a FUSE daemon at each publish target.  It
//! keeps no record of what it mounted: every call re-derives the state of
//! its target from the OS mount table, so a restarted plugin picks up where
//! the previous one left off and every call is safe to repeat.
//!
//! # Publish
//!
//! ```text
//! probe target ──missing──────────────► mkdir ─┐
//!      │ not mounted ──────────────────────────┤
//!      │ mounted, readable ──► done            │
//!      │ mounted, unreadable / corrupted       │
//!      └──► unmount ───────────────────────────┤
//!                                              ▼
//!         secret defaults + volume context ─► flags ─► env ─► launch ─► await ready
//! ```

pub mod env;
pub mod flags;
pub mod launcher;
pub mod locks;
pub mod poller;
pub mod unmount;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Code, CsiError};
use crate::identity::CsiIdentity;
use crate::mount::{MountState, MountTable, ProcMountTable};
use crate::node::CsiNode;
use crate::secret::SecretProvider;
use crate::types::*;

use self::launcher::{Launched, MountInvocation, ProcessRunner, Supervision, TokioProcessRunner};
use self::locks::TargetLocks;
use self::poller::PollConfig;

pub const PLUGIN_NAME: &str = "csi-rclone";

/// Settings of the rclone node plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcloneConfig {
    /// Unique identifier of this node.
    pub node_id: String,
    /// The mount helper, a path or a name looked up in `PATH`.
    pub helper_binary: PathBuf,
    /// Secret read for connection defaults when the volume context names
    /// none.  `None` disables the fallback.
    pub default_secret: Option<String>,
    pub poll: PollConfig,
    pub supervision: Supervision,
    /// Permissions of created target directories.
    pub dir_mode: u32,
    /// Start the helper with this process's environment as its base.
    pub inherit_env: bool,
}

impl Default for RcloneConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            helper_binary: PathBuf::from("rclone"),
            default_secret: Some("rclone-secret".to_owned()),
            poll: PollConfig::default(),
            supervision: Supervision::default(),
            dir_mode: 0o750,
            inherit_env: true,
        }
    }
}

/// CSI node plugin mounting rclone remotes.
pub struct RcloneBackend {
    config: RcloneConfig,
    secrets: Arc<dyn SecretProvider>,
    mounts: Arc<dyn MountTable>,
    runner: Arc<dyn ProcessRunner>,
    locks: TargetLocks,
}

impl RcloneBackend {
    /// Create a backend using the real mount table and process spawning.
    pub fn new(config: RcloneConfig, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            config,
            secrets,
            mounts: Arc::new(ProcMountTable::default()),
            runner: Arc::new(TokioProcessRunner),
            locks: TargetLocks::new(),
        }
    }

    pub fn with_mount_table(mut self, mounts: Arc<dyn MountTable>) -> Self {
        self.mounts = mounts;
        self
    }

    pub fn with_process_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn config(&self) -> &RcloneConfig {
        &self.config
    }

    /// Connection defaults for a volume: the secret named by `secretName`,
    /// else the configured default secret.  Never fails.
    async fn resolve_defaults(&self, volume_context: &VolumeContext) -> HashMap<String, String> {
        let Some(name) = volume_context
            .get(flags::KEY_SECRET_NAME)
            .or(self.config.default_secret.as_ref())
        else {
            return HashMap::new();
        };

        match self.secrets.get_secret(name).await {
            Ok(Some(data)) => {
                info!(secret = %name, keys = data.len(), "loaded connection defaults from secret");
                data
            }
            Ok(None) => {
                info!(secret = %name, "no connection defaults secret found");
                HashMap::new()
            }
            Err(e) => {
                warn!(secret = %name, error = %e, "can't load connection defaults, continuing without");
                HashMap::new()
            }
        }
    }

    fn base_env(&self) -> Vec<(String, String)> {
        if !self.config.inherit_env {
            return Vec::new();
        }
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    /// Clear a stale mount at `target` so it can be mounted afresh.
    async fn clear_stale_mount(&self, target: &Path) -> Result<(), CsiError> {
        unmount::unmount(self.mounts.as_ref(), target)
            .await
            .inspect_err(|e| error!(target_path = %target.display(), error = %e, "unmount of stale mount failed"))
    }

    async fn mount(
        &self,
        invocation: &MountInvocation,
        cancel: &CancellationToken,
    ) -> Result<(), CsiError> {
        let launched = launcher::launch(
            self.runner.as_ref(),
            invocation,
            self.config.supervision,
            self.config.dir_mode,
            cancel,
        )
        .await?;
        let helper = match launched {
            Launched::Detached => None,
            Launched::Supervised(process) => Some(process),
        };
        poller::await_ready(self.mounts.as_ref(), invocation, helper, self.config.poll, cancel)
            .await
            .map(|_| ())
    }
}

/// Fold a mount failure onto the status codes a CSI caller acts on:
/// permission problems and arguments the helper rejected keep a distinct
/// code, everything else is internal.
pub fn classify_publish_error(err: CsiError) -> CsiError {
    match err.code() {
        Code::InvalidArgument | Code::PermissionDenied | Code::Cancelled => err,
        Code::Internal => {
            let msg = err.to_string();
            if msg.to_lowercase().contains("invalid argument") {
                CsiError::InvalidArgument(msg)
            } else {
                err
            }
        }
    }
}

fn probe_error(target: &Path, e: io::Error) -> CsiError {
    CsiError::Internal(format!("probe {}: {e}", target.display()))
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for RcloneBackend {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: PLUGIN_NAME.to_owned(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        // Healthy when the helper can be executed.
        Ok(launcher::resolve_helper(&self.config.helper_binary)
            .await
            .is_some())
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// CsiNode
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiNode for RcloneBackend {
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        info!(staging_target_path = %req.staging_target_path, "NodeStageVolume: nothing to stage");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError> {
        info!("NodeUnstageVolume: nothing to unstage");
        Ok(())
    }

    #[instrument(
        skip(self, req, cancel),
        fields(volume_id = %req.volume_id, target_path = %req.target_path)
    )]
    async fn publish_volume(
        &self,
        req: NodePublishVolumeRequest,
        cancel: CancellationToken,
    ) -> Result<(), CsiError> {
        info!(read_only = req.read_only, "NodePublishVolume called");
        if req.target_path.is_empty() {
            return Err(CsiError::InvalidArgument(
                "NodePublishVolume Target Path must be provided".to_owned(),
            ));
        }
        let target = PathBuf::from(&req.target_path);
        let _guard = self.locks.lock(&target).await;

        match self.mounts.probe(&target).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                launcher::create_target_dir(&target, self.config.dir_mode).await?;
            }
            Err(e) => return Err(probe_error(&target, e)),
            Ok(MountState::NotMounted) => {}
            Ok(MountState::Mounted) => match self.mounts.check_readable(&target).await {
                Ok(()) => {
                    info!("already mounted to target");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "mount point is unreadable, unmounting it");
                    self.clear_stale_mount(&target).await?;
                }
            },
            Ok(MountState::Corrupted) => {
                warn!("corrupted mount point, unmounting it");
                self.clear_stale_mount(&target).await?;
            }
        }

        if !req.volume_capability.mount_flags.is_empty() {
            debug!(
                mount_flags = ?req.volume_capability.mount_flags,
                "capability mount flags are not passed to the helper",
            );
        }

        let defaults = self.resolve_defaults(&req.volume_context).await;
        let params = flags::merge_flags(&defaults, &req.volume_context)
            .inspect_err(|e| warn!(error = %e, "storage parameter error"))?;

        let invocation = MountInvocation {
            program: self.config.helper_binary.clone(),
            command: params.mount_command,
            remote: params.remote,
            remote_path: params.remote_path,
            target_path: target,
            env: env::build_env(
                self.base_env(),
                &params.flags,
                &req.volume_context,
                req.read_only,
            ),
        };

        self.mount(&invocation, &cancel)
            .await
            .map_err(classify_publish_error)
    }

    #[instrument(skip(self))]
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        info!("NodeUnpublishVolume called");
        if target_path.is_empty() {
            return Err(CsiError::InvalidArgument(
                "NodeUnpublishVolume Target Path must be provided".to_owned(),
            ));
        }
        let target = Path::new(target_path);
        let _guard = self.locks.lock(target).await;

        let state = match self.mounts.probe(target).await {
            Ok(state) => state,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("target path does not exist, volume not mounted");
                return Ok(());
            }
            Err(e) => return Err(probe_error(target, e)),
        };

        if state == MountState::NotMounted {
            info!("volume not mounted");
            return Ok(());
        }

        match unmount::unmount(self.mounts.as_ref(), target).await {
            Ok(()) => {
                if let Err(e) = tokio::fs::remove_dir(target).await {
                    warn!(error = %e, "could not remove target directory");
                }
                info!("volume unmounted successfully");
            }
            // Unmount failures are logged, never returned.
            Err(e) => error!(error = %e, "error while unmounting path, ignoring"),
        }
        Ok(())
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.config.node_id.clone(),
            max_volumes: 0,
        })
    }
}
