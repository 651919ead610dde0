use anyhow::Result;
use clap::Parser;
use fmirror_core::{Configuration, LogLevel, SyncManager, SyncStatus};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fmirror", version, about = "fmirror – keep directory trees mirrored")]
struct Cli {
    /// Path to config file (JSON / YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Configuration::from_path(&cli.config)?;
    init_tracing(config.log_level.unwrap_or_default());

    let (status_tx, status_rx) = watch::channel(SyncStatus::Synchronizing);
    tokio::spawn(report_status(status_rx));

    let manager = SyncManager::start(&config, status_tx).await?;

    info!("fmirror running... press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Stopping");
    manager.shutdown().await;
    Ok(())
}

fn init_tracing(level: LogLevel) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.as_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Stand-in for a status indicator: log every transition.
async fn report_status(mut rx: watch::Receiver<SyncStatus>) {
    while rx.changed().await.is_ok() {
        let status = *rx.borrow_and_update();
        match status {
            SyncStatus::Error => error!("An error occurred, see previous log entries"),
            status => info!("Status: {status}"),
        }
    }
}
