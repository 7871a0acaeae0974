//! wattd daemon entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wattd_daemon::{ClusterConfig, Daemon, StaticMonitor};

#[derive(Parser, Debug)]
#[command(name = "wattd", about = "Per-node energy-management daemon", version)]
struct Args {
    /// Cluster configuration file (.toml or .json).
    #[arg(short, long)]
    config: PathBuf,

    /// Name of this node as it appears in the cluster node list.
    /// Defaults to the machine hostname.
    #[arg(long, env = "WATTD_NODE_NAME")]
    node_name: Option<String>,
}

fn local_hostname() -> anyhow::Result<String> {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return Ok(name);
        }
    }
    let name = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .context("cannot determine hostname; pass --node-name")?;
    Ok(name.trim().to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ClusterConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let node_name = match args.node_name {
        Some(name) => name,
        None => local_hostname()?,
    };
    info!(node_name = %node_name, nodes = config.nodes.len(), fanout = config.fanout, "starting wattd");

    let monitor = Arc::new(StaticMonitor::default());
    let daemon = Arc::new(Daemon::new(&config, &node_name, monitor)?);
    let listener = daemon.bind().await?;

    tokio::select! {
        result = daemon.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
    Ok(())
}
