#![warn(clippy::all, clippy::pedantic)]

use std::net::SocketAddr;
use std::path::PathBuf;

use actix_web::{App, HttpServer, web};
use autoping_service::{Config, Orchestrator};
use clap::Parser;
use tracing::info;

mod error;
mod routes;

use error::AppError;
use logger::init_tracing;

/// AutoPing HTTP API
#[derive(Parser)]
#[command(name = "autoping-server", version, about)]
struct Cli {
    /// Config file, defaults to $XDG_CONFIG_HOME/autoping/config.toml
    #[arg(long)]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref())?;
    info!("Loaded configuration:\n{}", config);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    let orchestrator = Orchestrator::from_config(&config).await?;
    orchestrator.start_all().await?;

    let result = run_server(addr, web::Data::from(orchestrator.clone())).await;
    orchestrator.shutdown();
    result
}

async fn run_server(addr: SocketAddr, orchestrator: web::Data<Orchestrator>) -> Result<(), AppError> {
    info!("Listening on http://{}", addr);
    HttpServer::new(move || App::new().app_data(orchestrator.clone()).configure(routes::routes))
        .bind(addr)?
        .run()
        .await?;

    Ok(())
}
