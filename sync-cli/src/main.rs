//! # p2psync-cli
//!
//! CLI tool for trying p2psync device handshakes.
//!
//! ## Commands
//!
//! - `handshake`: Pair an in-process initiator and responder over the
//!   loopback transport and print what each side reports
//!
//! ## Example
//!
//! ```bash
//! # Happy path: authenticate, authorize, exchange identities, hand off
//! p2psync-cli handshake
//!
//! # The scanned token does not match the displayed one
//! p2psync-cli handshake --token-mismatch
//!
//! # The responder's authorization service declines the initiator
//! p2psync-cli handshake --reject-authorization
//!
//! # Use a config file and more logging
//! RUST_LOG=debug p2psync-cli --config p2psync.toml handshake --retries 3
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use p2psync_session::SessionConfig;

mod commands;
mod demo;

use commands::handshake::{self, Scenario};

/// CLI tool for trying p2psync device handshakes.
#[derive(Parser, Debug)]
#[command(name = "p2psync-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Session configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an initiator and a responder against each other
    Handshake {
        /// Make the initiator scan a token that does not match
        #[arg(long)]
        token_mismatch: bool,

        /// Make the responder decline the initiator's authorization details
        #[arg(long)]
        reject_authorization: bool,

        /// Identity transfer retries (overrides the config file)
        #[arg(long)]
        retries: Option<u32>,

        /// Give up after this many seconds
        #[arg(long, default_value = "10")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    match cli.command {
        Commands::Handshake {
            token_mismatch,
            reject_authorization,
            retries,
            timeout,
        } => {
            let mut config = config;
            if let Some(retries) = retries {
                config.retry.max_attempts = retries;
            }
            let scenario = Scenario {
                token_mismatch,
                reject_authorization,
            };
            handshake::run(config, scenario, Duration::from_secs(timeout)).await?;
        }
    }

    Ok(())
}
