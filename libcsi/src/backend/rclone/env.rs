//! Translation of helper flags into the rclone process environment.
//!
//! rclone reads every long option from the environment.  Built-in defaults
//! use rclone's own namespaced form (`RCLONE_ALLOW_OTHER`); flags taken from
//! the volume configuration are passed through without the prefix.

use std::collections::BTreeMap;

use crate::types::VolumeContext;

/// Flags applied to every mount unless the volume context sets the same key.
pub const DEFAULT_FLAGS: &[(&str, &str)] = &[("allow-other", "true")];

/// Added to the defaults for read-only publishes.
pub const READ_ONLY_FLAG: (&str, &str) = ("read-only", "true");

/// `allow-other` → `RCLONE_ALLOW_OTHER`.
pub fn flag_to_env_name(flag: &str) -> String {
    format!("RCLONE_{}", user_flag_to_env_name(flag))
}

/// `allow-other` → `ALLOW_OTHER`.
pub fn user_flag_to_env_name(flag: &str) -> String {
    flag.to_uppercase().replace('-', "_")
}

/// Build the helper environment: `base`, then defaults the caller did not
/// override, then the merged flags.  Later entries replace earlier ones
/// with the same name.
///
/// Only keys set in `overrides` (the volume context) suppress a default;
/// keys that came from a secret do not.
pub fn build_env<I>(
    base: I,
    flags: &BTreeMap<String, String>,
    overrides: &VolumeContext,
    read_only: bool,
) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: BTreeMap<String, String> = base.into_iter().collect();

    let read_only_default = read_only.then_some(READ_ONLY_FLAG);
    for (key, value) in DEFAULT_FLAGS.iter().copied().chain(read_only_default) {
        if !overrides.contains_key(key) {
            env.insert(flag_to_env_name(key), value.to_owned());
        }
    }

    for (key, value) in flags {
        env.insert(user_flag_to_env_name(key), value.clone());
    }
    env
}
