//! Command-line front end for fingerprint enrollment and identification.
//!
//! The sensor is simulated: `enroll` feeds a run of synthetic fingers to the
//! mock sensor and `match --finger N` presents finger `N` again.
//!
//! ```bash
//! biokey enroll --target 5
//! biokey match --finger 3
//! biokey list
//! RUST_LOG=biokey_session=debug biokey enroll --auto
//! ```

mod commands;
mod config;
mod simulator;

use std::path::PathBuf;

use anyhow::Result;
use biokey_core::CaptureMode;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "biokey")]
#[command(about = "Fingerprint enrollment and matching", long_about = None)]
struct Cli {
    /// TOML configuration file with [capture] and [database] tables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path, overrides the config file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a run of fingers
    Enroll {
        /// Drive captures from a loop instead of completion events
        #[arg(long)]
        auto: bool,

        /// Number of samples to collect
        #[arg(long)]
        target: Option<u32>,

        /// Seed of the first simulated finger
        #[arg(long, default_value_t = 1)]
        first_finger: u32,

        /// Give up on a slot after this many consecutive timeouts
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Identify a finger against the enrolled records
    Match {
        /// Seed of the simulated finger to present
        #[arg(long, default_value_t = 1)]
        finger: u32,
    },

    /// Print the number of enrolled records
    Count,

    /// Delete every enrolled record
    Clear,

    /// List enrolled records
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database.path = database;
    }

    match cli.command {
        Commands::Enroll {
            auto,
            target,
            first_finger,
            max_retries,
        } => {
            if let Some(target) = target {
                config.capture = config.capture.with_target_samples(target);
            }
            if max_retries.is_some() {
                config.capture = config.capture.with_max_timeout_retries(max_retries);
            }
            config.capture.validate()?;
            let mode = if auto {
                CaptureMode::Auto
            } else {
                config.capture.mode
            };
            commands::enroll(&config, mode, first_finger).await
        }
        Commands::Match { finger } => commands::identify(&config, finger).await,
        Commands::Count => commands::count(&config).await,
        Commands::Clear => commands::clear(&config).await,
        Commands::List => commands::list(&config).await,
    }
}
