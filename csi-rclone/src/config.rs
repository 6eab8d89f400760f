//! Command-line and environment configuration of the node plugin.
//!
//! Every global option can also be set from the environment:
//! - `NODE_ID`: node identifier reported by `info`.
//! - `CSI_RCLONE_HELPER`: mount helper binary. Defaults to `rclone`.
//! - `CSI_RCLONE_DEFAULT_SECRET`: secret holding connection defaults.
//!   Defaults to `rclone-secret`; an empty value disables it.
//! - `CSI_RCLONE_SECRETS_DIR`: where secrets are mounted, one directory per secret.
//! - `CSI_RCLONE_POLL_ATTEMPTS` / `CSI_RCLONE_POLL_INTERVAL_MS`: readiness budget.
//! - `CSI_RCLONE_SUPERVISION`: `background` (default) or `foreground`.
//! - `CSI_RCLONE_LOG_FORMAT`: `text` (default) or `json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use libcsi::backend::rclone::launcher::Supervision;
use libcsi::backend::rclone::poller::PollConfig;
use libcsi::{NodePublishVolumeRequest, RcloneConfig, VolumeContext};

#[derive(Parser, Debug)]
#[command(name = "csi-rclone-node", version, about = "CSI node plugin for rclone remotes")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mount a remote at a target path
    Publish(PublishArgs),

    /// Unmount a target path
    Unpublish(UnpublishArgs),

    /// Check that the mount helper can be executed
    Probe,

    /// Print plugin and node information
    Info,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Node identifier
    #[arg(long, env = "NODE_ID", default_value = "")]
    pub node_id: String,

    /// Mount helper binary
    #[arg(long, env = "CSI_RCLONE_HELPER", default_value = "rclone")]
    pub helper_binary: PathBuf,

    /// Secret read for connection defaults when a volume names none
    #[arg(long, env = "CSI_RCLONE_DEFAULT_SECRET", default_value = "rclone-secret")]
    pub default_secret: String,

    /// Directory holding one sub-directory per secret
    #[arg(long, env = "CSI_RCLONE_SECRETS_DIR", default_value = "/etc/csi-rclone/secrets")]
    pub secrets_dir: PathBuf,

    /// Mount-table checks before a mount times out
    #[arg(long, env = "CSI_RCLONE_POLL_ATTEMPTS", default_value_t = 30)]
    pub poll_attempts: u32,

    /// Delay between mount-table checks, in milliseconds
    #[arg(long, env = "CSI_RCLONE_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// How the helper process is supervised
    #[arg(long, env = "CSI_RCLONE_SUPERVISION", value_enum, default_value_t = SupervisionArg::Background)]
    pub supervision: SupervisionArg,

    /// Log output format
    #[arg(long, env = "CSI_RCLONE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionArg {
    Background,
    Foreground,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    /// JSON file holding a complete publish request
    #[arg(long, conflicts_with_all = ["target_path", "context", "read_only"])]
    pub request: Option<PathBuf>,

    /// Where to mount the volume
    #[arg(long, required_unless_present = "request")]
    pub target_path: Option<String>,

    #[arg(long, default_value = "")]
    pub volume_id: String,

    /// Mount read-only
    #[arg(long)]
    pub read_only: bool,

    /// Volume context entry, e.g. `--context remote=s3`
    #[arg(long = "context", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub context: Vec<(String, String)>,
}

#[derive(Args, Debug, Clone)]
pub struct UnpublishArgs {
    /// Mounted path to tear down
    #[arg(long)]
    pub target_path: String,

    #[arg(long, default_value = "")]
    pub volume_id: String,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_owned(), v.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}

impl GlobalFlags {
    /// Backend configuration derived from the flags.
    pub fn backend_config(&self) -> Result<RcloneConfig> {
        if self.poll_attempts == 0 {
            bail!("--poll-attempts must be at least 1");
        }
        let supervision = match self.supervision {
            SupervisionArg::Background => Supervision::Background,
            SupervisionArg::Foreground => Supervision::Foreground,
        };
        Ok(RcloneConfig {
            node_id: self.node_id.clone(),
            helper_binary: self.helper_binary.clone(),
            default_secret: (!self.default_secret.is_empty()).then(|| self.default_secret.clone()),
            poll: PollConfig {
                max_attempts: self.poll_attempts,
                interval: Duration::from_millis(self.poll_interval_ms),
            },
            supervision,
            ..RcloneConfig::default()
        })
    }
}

impl PublishArgs {
    /// Build the publish request from a JSON file or from the flags.
    pub fn into_request(self) -> Result<NodePublishVolumeRequest> {
        if let Some(path) = self.request {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            return serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse {}", path.display()));
        }

        Ok(NodePublishVolumeRequest {
            volume_id: self.volume_id.into(),
            target_path: self.target_path.unwrap_or_default(),
            read_only: self.read_only,
            volume_context: self.context.into_iter().collect::<VolumeContext>(),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_defaults() {
        let cli = Cli::try_parse_from(["csi-rclone-node", "probe"]).unwrap();
        let config = cli.global.backend_config().unwrap();
        let defaults = RcloneConfig::default();
        assert_eq!(config.poll, defaults.poll);
        assert_eq!(config.supervision, defaults.supervision);
        assert_eq!(config.default_secret, defaults.default_secret);
        assert_eq!(config.helper_binary, defaults.helper_binary);
    }

    #[test]
    fn publish_flags_build_request() {
        let cli = Cli::try_parse_from([
            "csi-rclone-node",
            "--supervision",
            "foreground",
            "publish",
            "--target-path",
            "/mnt/t",
            "--read-only",
            "--context",
            "remote=s3",
            "--context",
            "remotePath=bucket/a=b",
        ])
        .unwrap();
        assert_eq!(
            cli.global.backend_config().unwrap().supervision,
            Supervision::Foreground
        );

        let Commands::Publish(args) = cli.command else {
            panic!("expected publish");
        };
        let req = args.into_request().unwrap();
        assert_eq!(req.target_path, "/mnt/t");
        assert!(req.read_only);
        assert_eq!(req.volume_context["remote"], "s3");
        assert_eq!(req.volume_context["remotePath"], "bucket/a=b");
    }

    #[test]
    fn publish_request_from_json_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("req.json");
        std::fs::write(
            &path,
            r#"{"volume_id": "v1", "target_path": "/mnt/j", "volume_context": {"remote": "s3", "remotePath": "b"}}"#,
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "csi-rclone-node",
            "publish",
            "--request",
            path.to_str().unwrap(),
        ])
        .unwrap();
        let Commands::Publish(args) = cli.command else {
            panic!("expected publish");
        };
        let req = args.into_request().unwrap();
        assert_eq!(req.volume_id.0, "v1");
        assert_eq!(req.target_path, "/mnt/j");
    }

    #[test]
    fn malformed_context_is_rejected() {
        let result = Cli::try_parse_from([
            "csi-rclone-node",
            "publish",
            "--target-path",
            "/mnt/t",
            "--context",
            "novalue",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn zero_poll_attempts_is_rejected() {
        let cli =
            Cli::try_parse_from(["csi-rclone-node", "--poll-attempts", "0", "info"]).unwrap();
        assert!(cli.global.backend_config().is_err());
    }

    #[test]
    fn empty_default_secret_disables_fallback() {
        let cli =
            Cli::try_parse_from(["csi-rclone-node", "--default-secret", "", "info"]).unwrap();
        assert!(cli.global.backend_config().unwrap().default_secret.is_none());
    }
}
