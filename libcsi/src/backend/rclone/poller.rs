//! Waiting for an asynchronously started mount to appear.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::launcher::{CommandOutcome, HelperProcess, MountInvocation};
use crate::error::CsiError;
use crate::mount::MountTable;

/// Readiness polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Mount-table checks before giving up.
    pub max_attempts: u32,
    /// Delay before each check.
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_secs(1),
        }
    }
}

/// Poll the mount table until `invocation.target_path` is mounted.
///
/// Each attempt sleeps for `config.interval`, then checks that `helper` (if
/// supervised) has not failed, then checks the mount table once.  Returns
/// the number of mount-table checks it took.  A helper that exits cleanly
/// has handed the mount over to its daemon and is no longer watched.
pub async fn await_ready(
    mounts: &dyn MountTable,
    invocation: &MountInvocation,
    mut helper: Option<Box<dyn HelperProcess>>,
    config: PollConfig,
    cancel: &CancellationToken,
) -> Result<u32, CsiError> {
    let target = invocation.target_path.as_path();

    for attempt in 1..=config.max_attempts {
        debug!(target_path = %target.display(), attempt, "waiting for mountpoint");
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                warn!(target_path = %target.display(), attempt, "mount wait cancelled");
                return Err(CsiError::Cancelled(format!(
                    "waiting for mount of {} at {} abandoned",
                    invocation.remote_spec(),
                    target.display()
                )));
            }
            () = tokio::time::sleep(config.interval) => {}
        }

        let exited = helper.as_mut().and_then(|process| process.try_outcome());
        match exited {
            None => {}
            Some(CommandOutcome::Success) => {
                debug!(target_path = %target.display(), "mount helper detached");
                helper = None;
            }
            Some(outcome) => {
                let output = match helper.as_mut() {
                    Some(process) => process.output().await,
                    None => String::new(),
                };
                warn!(target_path = %target.display(), %outcome, "mount helper died");
                return Err(invocation.helper_failed(&outcome, output));
            }
        }

        match mounts.is_mounted(target).await {
            Ok(true) => {
                info!(target_path = %target.display(), attempt, "mountpoint ready");
                return Ok(attempt);
            }
            Ok(false) => {}
            Err(e) => debug!(target_path = %target.display(), error = %e, "mount table check failed"),
        }
    }

    info!(target_path = %target.display(), "mounting timed out");
    Err(invocation.timed_out(config.max_attempts))
}
