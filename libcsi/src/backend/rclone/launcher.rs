//! Starting the rclone mount helper.
//!
//! The helper is always invoked as
//! `<helper> <verb> <remote>:<remotePath> <targetPath> --daemon`, with all
//! other configuration passed through its environment.  How the child is
//! supervised is chosen by [`Supervision`].

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CsiError;

/// Upper bound on captured helper output kept for diagnostics.
const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

/// How long to wait for the helper's pipes to drain once it exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How the helper process is supervised after launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Supervision {
    /// Start the helper detached and check it is still alive on every
    /// readiness poll.
    #[default]
    Background,
    /// Run the helper to completion; it daemonises itself via `--daemon`.
    Foreground,
}

/// Classified exit of a helper process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    /// Non-zero exit; signal deaths are reported as `128 + signal`.
    NonZeroExit(i32),
    SpawnFailure(String),
}

impl From<ExitStatus> for CommandOutcome {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            return Self::Success;
        }
        let code = status
            .code()
            .or_else(|| status.signal().map(|sig| 128 + sig))
            .unwrap_or(-1);
        Self::NonZeroExit(code)
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("exited successfully"),
            Self::NonZeroExit(code) => write!(f, "exit status {code}"),
            Self::SpawnFailure(reason) => write!(f, "spawn failure: {reason}"),
        }
    }
}

/// Everything needed to mount one volume, derived once per publish call.
#[derive(Debug, Clone)]
pub struct MountInvocation {
    /// Helper executable, e.g. `rclone`.
    pub program: PathBuf,
    /// Helper subcommand, e.g. `mount`.
    pub command: String,
    pub remote: String,
    pub remote_path: String,
    pub target_path: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl MountInvocation {
    /// `<remote>:<remotePath>`.
    pub fn remote_spec(&self) -> String {
        format!("{}:{}", self.remote, self.remote_path)
    }

    /// `<program> <command>`, used in logs and errors.
    pub fn command_line(&self) -> String {
        format!("{} {}", self.program.display(), self.command)
    }

    pub fn to_command(&self) -> HelperCommand {
        HelperCommand {
            program: self.program.clone(),
            args: vec![
                self.command.clone(),
                self.remote_spec(),
                self.target_path.display().to_string(),
                "--daemon".to_owned(),
            ],
            env: self.env.clone(),
        }
    }

    pub(crate) fn helper_failed(&self, outcome: &CommandOutcome, output: String) -> CsiError {
        CsiError::HelperFailed {
            command: self.command_line(),
            remote: self.remote_spec(),
            target: self.target_path.display().to_string(),
            outcome: outcome.to_string(),
            output,
        }
    }

    pub(crate) fn timed_out(&self, attempts: u32) -> CsiError {
        CsiError::MountTimeout {
            command: self.command_line(),
            remote: self.remote_spec(),
            target: self.target_path.display().to_string(),
            attempts,
        }
    }
}

/// A fully resolved process invocation.  The environment replaces the
/// parent's environment entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Result of running a helper to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub outcome: CommandOutcome,
    /// Combined stdout and stderr.
    pub output: String,
}

/// A helper started in the background.
#[async_trait]
pub trait HelperProcess: Send {
    /// OS process id, if the process is still known to the runtime.
    fn id(&self) -> Option<u32>;

    /// Non-blocking liveness check: `None` while the process runs.
    fn try_outcome(&mut self) -> Option<CommandOutcome>;

    /// Output captured so far.
    async fn output(&mut self) -> String;
}

/// Spawns helper processes.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, capturing combined output.  `Err` means the
    /// process could not be started.  Dropping the future kills the process.
    async fn run(&self, cmd: &HelperCommand) -> io::Result<CommandOutput>;

    /// Start without waiting.
    fn spawn(&self, cmd: &HelperCommand) -> io::Result<Box<dyn HelperProcess>>;
}

/// [`ProcessRunner`] on top of [`tokio::process`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    fn command(cmd: &HelperCommand) -> Command {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .env_clear()
            .envs(&cmd.env)
            .stdin(Stdio::null());
        command
    }

    fn spawn_helper(cmd: &HelperCommand) -> io::Result<TokioHelperProcess> {
        let mut child = Self::command(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let captured: Captured = Arc::new(Mutex::new(Some(Vec::new())));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(capture(stdout, Arc::clone(&captured)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(capture(stderr, Arc::clone(&captured)));
        }

        Ok(TokioHelperProcess {
            child,
            captured,
            readers,
        })
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, cmd: &HelperCommand) -> io::Result<CommandOutput> {
        let out = Self::command(cmd).kill_on_drop(true).output().await?;
        let mut combined = out.stdout;
        combined.extend_from_slice(&out.stderr);
        Ok(CommandOutput {
            outcome: out.status.into(),
            output: String::from_utf8_lossy(&combined).into_owned(),
        })
    }

    fn spawn(&self, cmd: &HelperCommand) -> io::Result<Box<dyn HelperProcess>> {
        Ok(Box::new(Self::spawn_helper(cmd)?))
    }
}

/// Helper output shared with the pipe readers; `None` once nobody will
/// read it again.
type Captured = Arc<Mutex<Option<Vec<u8>>>>;

/// Copy a pipe into `sink` until EOF, keeping at most
/// [`MAX_CAPTURED_OUTPUT`] bytes but always draining so the writer never
/// blocks on a full pipe or sees it closed.
fn capture<R>(mut pipe: R, sink: Captured) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut guard = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(buf) = guard.as_mut() {
                        let room = MAX_CAPTURED_OUTPUT.saturating_sub(buf.len());
                        buf.extend_from_slice(&chunk[..n.min(room)]);
                    }
                }
            }
        }
    })
}

struct TokioHelperProcess {
    child: Child,
    captured: Captured,
    readers: Vec<JoinHandle<()>>,
}

impl Drop for TokioHelperProcess {
    // A daemonised grandchild may still hold the pipes.  The readers keep
    // draining until it closes them, so only the buffer is released here.
    fn drop(&mut self) {
        *self.captured.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[async_trait]
impl HelperProcess for TokioHelperProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_outcome(&mut self) -> Option<CommandOutcome> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.into()),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "failed to query helper status");
                None
            }
        }
    }

    async fn output(&mut self) -> String {
        // Once the child exited its pipes close, unless a daemonised
        // grandchild inherited them.
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            for reader in &mut self.readers {
                let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await;
            }
            self.readers.clear();
        }
        let guard = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_deref()
            .map(|buf| String::from_utf8_lossy(buf).into_owned())
            .unwrap_or_default()
    }
}

/// What [`launch`] left running.
pub enum Launched {
    /// The helper ran to completion; the mount is owned by its daemon.
    Detached,
    /// The helper is still running and must be watched while polling.
    Supervised(Box<dyn HelperProcess>),
}

/// Create the target directory and start the helper for `invocation`.
///
/// A foreground helper is abandoned, and killed, when `cancel` fires.
pub async fn launch(
    runner: &dyn ProcessRunner,
    invocation: &MountInvocation,
    supervision: Supervision,
    dir_mode: u32,
    cancel: &CancellationToken,
) -> Result<Launched, CsiError> {
    create_target_dir(&invocation.target_path, dir_mode).await?;

    info!(
        cmd = %invocation.command_line(),
        remote = %invocation.remote_spec(),
        target_path = %invocation.target_path.display(),
        ?supervision,
        "executing mount command",
    );

    let cmd = invocation.to_command();
    match supervision {
        Supervision::Foreground => {
            let out = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!(target_path = %invocation.target_path.display(), "mount helper run cancelled");
                    return Err(CsiError::Cancelled(format!(
                        "mount of {} at {} abandoned while the helper was running",
                        invocation.remote_spec(),
                        invocation.target_path.display()
                    )));
                }
                out = runner.run(&cmd) => out.map_err(|e| spawn_error(invocation, e))?,
            };
            if out.outcome != CommandOutcome::Success {
                return Err(invocation.helper_failed(&out.outcome, out.output));
            }
            debug!(output = %out.output, "mount helper exited");
            Ok(Launched::Detached)
        }
        Supervision::Background => {
            let process = runner.spawn(&cmd).map_err(|e| spawn_error(invocation, e))?;
            debug!(pid = ?process.id(), "mount helper started");
            Ok(Launched::Supervised(process))
        }
    }
}

/// Idempotently create `path` (and parents) with `mode`.
pub async fn create_target_dir(path: &Path, mode: u32) -> Result<(), CsiError> {
    tokio::fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .await
        .map_err(|e| CsiError::from_io(path, e))
}

fn spawn_error(invocation: &MountInvocation, e: io::Error) -> CsiError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        return CsiError::PermissionDenied(format!(
            "cannot execute {}: {e}",
            invocation.program.display()
        ));
    }
    invocation.helper_failed(&CommandOutcome::SpawnFailure(e.to_string()), String::new())
}

/// Resolve `program` the way `execvp` would: paths are checked directly,
/// bare names are searched in `PATH`.
pub async fn resolve_helper(program: &Path) -> Option<PathBuf> {
    async fn is_file(path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    if program.components().count() > 1 {
        return is_file(program).await.then(|| program.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&search) {
        let candidate = dir.join(program);
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}
