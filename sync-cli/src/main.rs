//! # sync-cli
//!
//! Demo and inspection tool for selfsync.
//!
//! ## Commands
//!
//! - `simulate`: Run devices sharing one identity over an in-process network
//! - `config`: Validate and print a configuration file
//!
//! ## Example
//!
//! ```bash
//! # Three devices, one foreign intruder, device 2 goes quiet at t=5
//! selfsync simulate --devices 3 --foreign --silence 2
//!
//! # Same, as JSON
//! selfsync simulate --devices 3 --json
//!
//! # Repeat a run under the identity it printed
//! selfsync simulate --identity <HEX>
//!
//! # Check a config file
//! selfsync --config selfsync.toml config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use selfsync_types::PublicKey;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod loopback;

use commands::simulate::SimulateOptions;

/// Demo and inspection tool for selfsync.
#[derive(Parser, Debug)]
#[command(name = "selfsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults apply when omitted)
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `selfsync_manager=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run devices sharing one identity over an in-process network
    Simulate {
        /// Shared identity as 64 hex characters (random when omitted)
        #[arg(long, value_name = "HEX", value_parser = parse_identity)]
        identity: Option<PublicKey>,

        /// Devices sharing the identity
        #[arg(long, short, default_value = "3")]
        devices: usize,

        /// Add a device with another identity that tries to connect
        #[arg(long)]
        foreign: bool,

        /// Simulated seconds
        #[arg(long, default_value = "30")]
        duration: u64,

        /// Friend whose rename is broadcast
        #[arg(long, default_value = "42")]
        friend: u32,

        /// New name for that friend
        #[arg(long, default_value = "Bob")]
        name: String,

        /// Device whose outgoing traffic stops
        #[arg(long)]
        silence: Option<usize>,

        /// Second at which it stops
        #[arg(long, default_value = "5")]
        silence_at: u64,

        /// Override the table capacity
        #[arg(long)]
        capacity: Option<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate and print the configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    match cli.command {
        Commands::Simulate {
            identity,
            devices,
            foreign,
            duration,
            friend,
            name,
            silence,
            silence_at,
            capacity,
            json,
        } => {
            let mut config = commands::config::load(cli.config.as_deref())?;
            if let Some(capacity) = capacity {
                config.table.capacity = capacity;
                config.validate().context("Invalid --capacity")?;
            }
            let options = SimulateOptions {
                identity,
                devices,
                foreign,
                duration,
                friend,
                name,
                silence,
                silence_at,
            };
            commands::simulate::run(&config, &options, json)?;
        }
        Commands::Config => {
            commands::config::run(cli.config.as_deref())?;
        }
    }

    Ok(())
}

fn parse_identity(value: &str) -> Result<PublicKey, String> {
    PublicKey::from_hex(value).ok_or_else(|| "expected 64 hex characters".to_string())
}

/// Install the log subscriber. Logs go to stderr so `--json` output stays clean.
fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(directives) => EnvFilter::try_new(directives).context("Invalid --log-level")?,
        None => EnvFilter::builder()
            .with_default_directive(Level::INFO.into())
            .from_env_lossy(),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
