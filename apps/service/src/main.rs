#![warn(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

mod api;
mod checks;
mod config;
mod database;
mod orchestrator;
mod pool;
mod roster;

use config::Config;
use logger::init_tracing;
use orchestrator::Orchestrator;

#[derive(Debug, Parser)]
#[command(version, about = "Payment terminal liveness monitor")]
struct Args {
    /// Path to the TOML config file; created with defaults if missing
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the database path from the config file
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();

    let mut config =
        Config::from_config(args.config.as_ref()).context("failed to load configuration")?;
    if let Some(database) = args.database {
        config.database.path = database;
    }
    config.validate().context("invalid configuration")?;
    info!("{config}");

    let pool = pool::build_pool(&config.database.path).await?;
    Orchestrator::start(config, pool).await
}
