//! Forced unmount of a target path.

use std::path::Path;

use nix::errno::Errno;
use tracing::info;

use crate::error::CsiError;
use crate::mount::MountTable;

/// Detach whatever is mounted at `target`.
///
/// Every failure is reported with the target path; whether it is fatal is
/// up to the caller.
pub async fn unmount(mounts: &dyn MountTable, target: &Path) -> Result<(), CsiError> {
    match mounts.unmount(target).await {
        Ok(()) => {
            info!(target_path = %target.display(), "unmounted");
            Ok(())
        }
        Err(errno) => Err(classify(target, errno)),
    }
}

fn classify(target: &Path, errno: Errno) -> CsiError {
    let path = target.display().to_string();
    match errno {
        Errno::EPERM => CsiError::PermissionDenied(format!("unmount {path}: {errno}")),
        Errno::EINVAL => CsiError::UnmountFailed {
            path,
            reason: "not a mount point".to_owned(),
        },
        Errno::ENOENT => CsiError::UnmountFailed {
            path,
            reason: "no such file or directory".to_owned(),
        },
        Errno::EBUSY => CsiError::UnmountFailed {
            path,
            reason: "target is busy".to_owned(),
        },
        other => CsiError::UnmountFailed {
            path,
            reason: other.desc().to_owned(),
        },
    }
}
