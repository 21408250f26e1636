//! Term Cluster CLI
//!
//! Clusters term vectors read from a JSON file.
//!
//! # Usage
//!
//! ```bash
//! # Cluster with the layered configuration (config/default.toml, env)
//! term-cluster run --input vectors.json
//!
//! # Override the strategy and cluster count, emit JSON
//! term-cluster run --input vectors.json --method spectral --clusters 5 --json
//!
//! # Use a specific config file
//! term-cluster --config cluster.toml run --input vectors.json
//!
//! # Print the effective configuration
//! term-cluster show-config
//!
//! # Debug logging
//! RUST_LOG=debug term-cluster run --input vectors.json
//! ```
//!
//! Logs go to stderr; stdout carries only the result.

mod commands;

use std::io;
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use term_cluster_core::config::{Config, LoggingConfig};

use commands::run::RunArgs;
use commands::show_config::ShowConfigArgs;

/// Cluster sparse weighted term vectors.
#[derive(Parser)]
#[command(name = "term-cluster", version, about)]
struct Cli {
    /// Path to a TOML configuration file (skips layered loading)
    #[arg(short, long, global = true, env = "TERM_CLUSTER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster the vectors in an input file
    Run(RunArgs),
    /// Print the effective configuration
    ShowConfig(ShowConfigArgs),
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.format.eq_ignore_ascii_case("compact") {
        builder.compact().init();
    } else {
        builder.pretty().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    init_logging(&config.logging);
    tracing::debug!(method = %config.clustering.method, "configuration loaded");

    let code = match cli.command {
        Commands::Run(args) => commands::run::handle_run(args, config).await,
        Commands::ShowConfig(args) => commands::show_config::handle_show_config(args, &config),
    };
    if code != 0 {
        process::exit(code);
    }
    Ok(())
}
