//! ---
//! album_section: "05-networking-external-interfaces"
//! album_subsection: "binary"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Control CLI invoking actions on an R-Album daemon."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use r_album_common::config::TransportConfig;
use r_album_logging as logging;
use r_album_transport::{socket, AdaptorOptions, SendOutcome};
use serde_json::Value;
use tokio::runtime::Runtime;

const DEFAULT_URL: &str = "ws://127.0.0.1:5500/cmd";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "R-Album RPC control utility",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Invoke an action and print its reply")]
    Call(ActionArgs),
    #[command(about = "Send a notification without waiting for a reply")]
    Notify(ActionArgs),
}

#[derive(Debug, Args)]
struct ActionArgs {
    /// Action as `<Service>:<method>`.
    action: String,
    /// JSON payload.
    #[arg(default_value = "{}")]
    payload: String,
    /// Daemon WebSocket endpoint.
    #[arg(long, env = "R_ALBUM_URL", default_value = DEFAULT_URL)]
    url: String,
    /// Send attempts while the connection is not ready.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,
}

impl ActionArgs {
    fn payload(&self) -> Result<Value> {
        serde_json::from_str(&self.payload)
            .with_context(|| format!("payload is not valid JSON: {}", self.payload))
    }

    fn options(&self) -> AdaptorOptions {
        AdaptorOptions::new(TransportConfig {
            max_retries: self.max_retries.max(1),
            ..TransportConfig::default()
        })
    }
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let runtime = Runtime::new()?;
    runtime.block_on(run(cli.command))
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Call(args) => {
            let payload = args.payload()?;
            let adaptor = socket::connect(&args.url, args.options()).await?;
            let result = adaptor.call(args.action.as_str(), payload).await;
            adaptor.disconnect();
            match result {
                Ok(reply) => println!("{}", serde_json::to_string_pretty(&reply)?),
                Err(err) => bail!("{} failed: {}", args.action, err),
            }
        }
        Commands::Notify(args) => {
            let payload = args.payload()?;
            let adaptor = socket::connect(&args.url, args.options()).await?;
            let outcome = adaptor.notify(args.action.as_str(), payload).await;
            adaptor.disconnect();
            if let SendOutcome::Abandoned { reason, .. } = outcome {
                bail!("{} was not sent: {:?}", args.action, reason);
            }
        }
    }
    Ok(())
}
