mod cloudwatch;
mod config;
mod flow;
mod logging;
mod receiver;
mod syslog;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use cloudwatch::client::{CloudWatchLogs, LogsApi};
use flow::Flow;

#[derive(Parser)]
#[command(name = "logs-agent", disable_version_flag = true)]
struct Cli {
    /// Path to the agent configuration file
    #[arg(
        short = 'c',
        long = "config",
        value_name = "PATH",
        default_value = config::DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,

    /// Print version and exit
    #[arg(short = 'v', long = "version")]
    version: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let cfg = config::load(&cli.config)
        .with_context(|| format!("could not load config file {}", cli.config.display()))?;
    logging::init(&cfg.main)?;

    let api: Arc<dyn LogsApi> = Arc::new(CloudWatchLogs::from_env().await);

    let mut flows = Vec::with_capacity(cfg.flows.len());
    for flow_cfg in cfg.flows {
        let name = flow_cfg.name.clone();
        match Flow::start(flow_cfg, api.clone()).await {
            Ok(flow) => flows.push(flow),
            Err(err) => {
                for flow in flows {
                    flow.shutdown().await;
                }
                return Err(err.context(format!("could not start flow {}", name)));
            }
        }
    }
    info!("started {} flow(s)", flows.len());

    wait_for_signal().await?;
    info!("termination signal received, draining flows");

    for flow in flows {
        flow.shutdown().await;
    }
    info!("all flows drained");
    Ok(())
}

async fn wait_for_signal() -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("interrupt handler failed")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
