//! In-memory stand-ins for the mount table and the process runner.

use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use nix::errno::Errno;

use super::launcher::{CommandOutcome, CommandOutput, HelperCommand, HelperProcess, ProcessRunner};
use crate::mount::{MountState, MountTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeState {
    NotMounted,
    Mounted,
    Corrupted,
}

/// Mount table whose target becomes mounted on the n-th readiness check.
/// Paths missing on disk probe as `NotFound`.
pub struct FakeMountTable {
    state: Mutex<FakeState>,
    mount_after: Mutex<Option<u32>>,
    unmount_error: Mutex<Option<Errno>>,
    pub readable: AtomicBool,
    pub probes: AtomicU32,
    pub readiness_checks: AtomicU32,
    pub unmounts: AtomicU32,
}

impl Default for FakeMountTable {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState::NotMounted),
            mount_after: Mutex::new(None),
            unmount_error: Mutex::new(None),
            readable: AtomicBool::new(true),
            probes: AtomicU32::new(0),
            readiness_checks: AtomicU32::new(0),
            unmounts: AtomicU32::new(0),
        }
    }
}

impl FakeMountTable {
    pub fn set_state(&self, state: FakeState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn mount_after(&self, checks: u32) {
        *self.mount_after.lock().unwrap() = Some(checks);
    }

    pub fn fail_unmount(&self, errno: Errno) {
        *self.unmount_error.lock().unwrap() = Some(errno);
    }
}

#[async_trait]
impl MountTable for FakeMountTable {
    async fn probe(&self, path: &Path) -> io::Result<MountState> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if !path.exists() {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        Ok(match *self.state.lock().unwrap() {
            FakeState::NotMounted => MountState::NotMounted,
            FakeState::Mounted => MountState::Mounted,
            FakeState::Corrupted => MountState::Corrupted,
        })
    }

    async fn is_mounted(&self, _path: &Path) -> io::Result<bool> {
        let n = self.readiness_checks.fetch_add(1, Ordering::SeqCst) + 1;
        let ready = self.mount_after.lock().unwrap().is_some_and(|k| n >= k);
        if ready {
            self.set_state(FakeState::Mounted);
        }
        Ok(ready)
    }

    async fn check_readable(&self, _path: &Path) -> io::Result<()> {
        if self.readable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(io::Error::from_raw_os_error(Errno::ENOTCONN as i32))
        }
    }

    async fn unmount(&self, _path: &Path) -> nix::Result<()> {
        self.unmounts.fetch_add(1, Ordering::SeqCst);
        if let Some(errno) = *self.unmount_error.lock().unwrap() {
            return Err(errno);
        }
        self.set_state(FakeState::NotMounted);
        Ok(())
    }
}

/// Scripted exit of a spawned fake helper.
#[derive(Debug, Clone)]
struct Exit {
    after_checks: u32,
    outcome: CommandOutcome,
    output: String,
}

/// Process runner recording every command instead of executing it.
pub struct FakeRunner {
    commands: Mutex<Vec<HelperCommand>>,
    run_result: Mutex<CommandOutput>,
    exit: Mutex<Option<Exit>>,
    spawn_error: Mutex<Option<io::ErrorKind>>,
    hang: AtomicBool,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            run_result: Mutex::new(CommandOutput {
                outcome: CommandOutcome::Success,
                output: String::new(),
            }),
            exit: Mutex::new(None),
            spawn_error: Mutex::new(None),
            hang: AtomicBool::new(false),
        }
    }
}

impl FakeRunner {
    pub fn commands(&self) -> Vec<HelperCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Foreground runs finish with `outcome`.
    pub fn run_result(&self, outcome: CommandOutcome, output: &str) {
        *self.run_result.lock().unwrap() = CommandOutput {
            outcome,
            output: output.to_owned(),
        };
    }

    /// Spawned helpers report `outcome` on their n-th liveness check.
    pub fn exit_after(&self, checks: u32, outcome: CommandOutcome, output: &str) {
        *self.exit.lock().unwrap() = Some(Exit {
            after_checks: checks,
            outcome,
            output: output.to_owned(),
        });
    }

    /// Foreground runs never finish.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn fail_spawn(&self, kind: io::ErrorKind) {
        *self.spawn_error.lock().unwrap() = Some(kind);
    }

    fn record(&self, cmd: &HelperCommand) -> io::Result<()> {
        if let Some(kind) = *self.spawn_error.lock().unwrap() {
            return Err(io::Error::from(kind));
        }
        self.commands.lock().unwrap().push(cmd.clone());
        Ok(())
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, cmd: &HelperCommand) -> io::Result<CommandOutput> {
        self.record(cmd)?;
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.run_result.lock().unwrap().clone())
    }

    fn spawn(&self, cmd: &HelperCommand) -> io::Result<Box<dyn HelperProcess>> {
        self.record(cmd)?;
        Ok(Box::new(FakeProcess {
            checks: 0,
            exit: self.exit.lock().unwrap().clone(),
        }))
    }
}

struct FakeProcess {
    checks: u32,
    exit: Option<Exit>,
}

#[async_trait]
impl HelperProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    fn try_outcome(&mut self) -> Option<CommandOutcome> {
        self.checks += 1;
        self.exit
            .as_ref()
            .filter(|exit| self.checks >= exit.after_checks)
            .map(|exit| exit.outcome.clone())
    }

    async fn output(&mut self) -> String {
        self.exit
            .as_ref()
            .map(|exit| exit.output.clone())
            .unwrap_or_default()
    }
}
