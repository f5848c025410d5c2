use std::path::PathBuf;

use anyhow::Result;
use autoping_service::{Config, Orchestrator};
use clap::Parser;
use logger::init_tracing;
use tracing::info;

/// Headless AutoPing monitor
#[derive(Parser)]
#[command(name = "autoping-service", version, about)]
struct Cli {
    /// Config file, defaults to $XDG_CONFIG_HOME/autoping/config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured database path
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_config(cli.config.as_ref())?;
    if let Some(path) = cli.database {
        config.database.path = path;
    }
    info!("Loaded configuration:\n{}", config);

    let orchestrator = Orchestrator::from_config(&config).await?;
    orchestrator.start_all().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    orchestrator.shutdown();

    Ok(())
}
