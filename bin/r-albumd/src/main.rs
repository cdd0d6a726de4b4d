//! ---
//! album_section: "01-core-functionality"
//! album_subsection: "binary"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Binary entrypoint for the R-Album daemon."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use r_album_common::config::AppConfig;
use r_album_common::logging::init_tracing;
use r_albumd::spawn_server;
use tokio::signal;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "R-Album RPC daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Override the listen address")]
    listen: Option<SocketAddr>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Serve RPC connections until interrupted")]
    Run,
    #[command(about = "Print the effective configuration as TOML and exit")]
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/r-album.toml"));
    candidates.push(PathBuf::from("configs/r-album.example.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::PrintConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Run => {
            init_tracing("r-albumd", &config.logging)?;
            match &loaded.source {
                Some(path) => info!(
                    source = %path.display(),
                    elapsed_ms = load_started.elapsed().as_millis() as u64,
                    "configuration loaded"
                ),
                None => info!("no configuration file found; using defaults"),
            }
            run_daemon(config).await?;
        }
    }
    Ok(())
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let server = spawn_server(&config, Vec::new())?;
    info!(
        address = %server.addr(),
        path = %config.server.ws_path,
        "daemon running; waiting for termination signal"
    );
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    server.shutdown().await
}
