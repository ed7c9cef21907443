//! MPU Relay - Credential-isolating multipart upload relay
//!
//! Accepts browser uploads over a three-phase protocol and performs the
//! multipart calls against an S3-compatible backend with server-held keys.

use clap::Parser;
use mpu_relay::{config::Config, server::Server};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// MPU Relay - Multipart upload relay with credential isolation
#[derive(Parser, Debug)]
#[command(name = "mpu-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging; unrecognized levels quietly mean info
    let level = Level::from_str(&args.log_level).unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting MPU Relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load(&args.config)?;
    info!("Loaded configuration from {:?}", args.config);

    // Start server
    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
