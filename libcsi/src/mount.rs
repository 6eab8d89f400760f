//! OS mount-table access.
//!
//! The mount table is the only persistent record of whether a volume is
//! published; nothing is cached in memory.  [`MountTable`] is the seam the
//! backends call through, and [`ProcMountTable`] is the Linux implementation
//! backed by `/proc/self/mounts`.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::errno::Errno;
use nix::mount::MntFlags;
use tracing::debug;

/// Observed state of a path in the mount table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    /// The path exists and is not a mount point.
    NotMounted,
    /// The path is listed as a mount point.
    Mounted,
    /// The path is a mount point whose backing filesystem is gone
    /// (e.g. the FUSE daemon died); `stat` on it fails.
    Corrupted,
}

/// Point-in-time queries and mutations against the OS mount table.
#[async_trait]
pub trait MountTable: Send + Sync {
    /// Classify `path`.  Returns an error of kind [`io::ErrorKind::NotFound`]
    /// when the path does not exist.
    async fn probe(&self, path: &Path) -> io::Result<MountState>;

    /// Whether `path` is currently listed as a mount point.
    async fn is_mounted(&self, path: &Path) -> io::Result<bool>;

    /// Succeeds when the directory at `path` can be listed.
    async fn check_readable(&self, path: &Path) -> io::Result<()> {
        let mut dir = tokio::fs::read_dir(path).await?;
        dir.next_entry().await?;
        Ok(())
    }

    /// Forcefully and lazily detach the mount at `path`.
    async fn unmount(&self, path: &Path) -> nix::Result<()>;
}

/// Errnos `stat` reports on a mount point whose filesystem went away.
const CORRUPTED_MOUNT_ERRNOS: [Errno; 5] = [
    Errno::ENOTCONN,
    Errno::ESTALE,
    Errno::EIO,
    Errno::EACCES,
    Errno::EHOSTDOWN,
];

/// Return `true` if `e` indicates a corrupted (stale) mount point.
pub fn is_corrupted_mount(e: &io::Error) -> bool {
    e.raw_os_error()
        .is_some_and(|raw| CORRUPTED_MOUNT_ERRNOS.iter().any(|errno| *errno as i32 == raw))
}

/// [`MountTable`] reading `/proc/self/mounts`.
#[derive(Debug, Clone)]
pub struct ProcMountTable {
    mounts_file: PathBuf,
}

impl Default for ProcMountTable {
    fn default() -> Self {
        Self {
            mounts_file: PathBuf::from("/proc/self/mounts"),
        }
    }
}

impl ProcMountTable {
    /// Read mount points from a file in `/proc/self/mounts` format.
    pub fn with_mounts_file(mounts_file: impl Into<PathBuf>) -> Self {
        Self {
            mounts_file: mounts_file.into(),
        }
    }
}

#[async_trait]
impl MountTable for ProcMountTable {
    async fn probe(&self, path: &Path) -> io::Result<MountState> {
        match tokio::fs::metadata(path).await {
            Ok(_) => {}
            Err(e) if is_corrupted_mount(&e) => {
                debug!(path = %path.display(), error = %e, "stat failed on likely corrupted mount");
                return Ok(MountState::Corrupted);
            }
            Err(e) => return Err(e),
        }

        if self.is_mounted(path).await? {
            Ok(MountState::Mounted)
        } else {
            Ok(MountState::NotMounted)
        }
    }

    async fn is_mounted(&self, path: &Path) -> io::Result<bool> {
        let contents = tokio::fs::read_to_string(&self.mounts_file).await?;
        Ok(parse_mount_points(&contents).any(|mp| Path::new(&mp) == path))
    }

    async fn unmount(&self, path: &Path) -> nix::Result<()> {
        nix::mount::umount2(path, MntFlags::MNT_FORCE | MntFlags::MNT_DETACH)
    }
}

/// Iterate over the mount point column of a `/proc/self/mounts` document.
///
/// Format: `<device> <mountpoint> <fstype> <options> <dump> <pass>`, with
/// whitespace and backslashes in paths written as octal escapes.
pub fn parse_mount_points(contents: &str) -> impl Iterator<Item = String> + '_ {
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(unescape_octal)
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1] <= b'3'
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let code = bytes[i + 1..i + 4]
                .iter()
                .fold(0u8, |acc, b| (acc << 3) | (b - b'0'));
            out.push(code);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
