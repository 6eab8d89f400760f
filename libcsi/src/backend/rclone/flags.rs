//! Merging of secret defaults and volume-context overrides into the
//! parameters of one rclone mount.

use std::collections::{BTreeMap, HashMap};

use crate::error::CsiError;

/// Name of the rclone remote (`<remote>:<path>`).
pub const KEY_REMOTE: &str = "remote";
/// Path inside the remote.
pub const KEY_REMOTE_PATH: &str = "remotePath";
/// Optional suffix appended to [`KEY_REMOTE_PATH`].
pub const KEY_REMOTE_PATH_SUFFIX: &str = "remotePathSuffix";
/// Optional rclone subcommand, `mount` unless set.
pub const KEY_MOUNT_COMMAND: &str = "mountCommand";
/// Optional name of the secret holding connection defaults.
pub const KEY_SECRET_NAME: &str = "secretName";

pub const DEFAULT_MOUNT_COMMAND: &str = "mount";

/// Structural values extracted from the merged configuration, plus the
/// flags left over for the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountParams {
    pub remote: String,
    pub remote_path: String,
    pub mount_command: String,
    pub flags: BTreeMap<String, String>,
}

/// Apply `overrides` on top of `defaults` and split off the structural keys.
///
/// Fails with [`CsiError::InvalidArgument`] if `remote` or `remotePath` is
/// absent from both sources.  Neither input is modified.
pub fn merge_flags(
    defaults: &HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> Result<MountParams, CsiError> {
    let mut flags: BTreeMap<String, String> = defaults
        .iter()
        .chain(overrides.iter())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let remote = flags
        .remove(KEY_REMOTE)
        .ok_or_else(|| missing(KEY_REMOTE))?;
    let mut remote_path = flags
        .remove(KEY_REMOTE_PATH)
        .ok_or_else(|| missing(KEY_REMOTE_PATH))?;

    if let Some(suffix) = flags.remove(KEY_REMOTE_PATH_SUFFIX) {
        remote_path.push_str(&suffix);
    }
    let mount_command = flags
        .remove(KEY_MOUNT_COMMAND)
        .unwrap_or_else(|| DEFAULT_MOUNT_COMMAND.to_owned());
    flags.remove(KEY_SECRET_NAME);

    Ok(MountParams {
        remote,
        remote_path,
        mount_command,
        flags,
    })
}

fn missing(key: &str) -> CsiError {
    CsiError::InvalidArgument(format!("missing volume context value: {key}"))
}
