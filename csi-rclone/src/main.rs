mod config;

use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use libcsi::secret::DirSecretProvider;
use libcsi::{CsiError, CsiIdentity, CsiNode, RcloneBackend};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Cli, Commands, LogFormat};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.log_format);

    if let Err(error) = run(cli).await {
        match error.downcast_ref::<CsiError>() {
            Some(e) => eprintln!("Error ({:?}): {e}", e.code()),
            None => eprintln!("Error: {error:#}"),
        }
        process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.global.backend_config()?;
    let secrets = Arc::new(DirSecretProvider::new(&cli.global.secrets_dir));
    let backend = RcloneBackend::new(config, secrets);

    match cli.command {
        Commands::Publish(args) => {
            let req = args.into_request()?;
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, abandoning publish");
                    on_signal.cancel();
                }
            });
            backend.publish_volume(req, cancel).await?;
        }
        Commands::Unpublish(args) => {
            backend
                .unpublish_volume(&args.volume_id.into(), &args.target_path)
                .await?;
        }
        Commands::Probe => {
            let healthy = backend.probe().await?;
            println!("{}", serde_json::json!({ "ready": healthy }));
            if !healthy {
                anyhow::bail!(
                    "mount helper {} not found",
                    backend.config().helper_binary.display()
                );
            }
        }
        Commands::Info => {
            let plugin = backend.get_plugin_info().await?;
            let node = backend.get_info().await?;
            println!(
                "{}",
                serde_json::json!({
                    "plugin": plugin,
                    "node": node,
                    "config": backend.config(),
                })
            );
        }
    }
    info!("done");
    Ok(())
}
