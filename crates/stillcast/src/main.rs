//! Stillcast CLI - live HLS streams from directories of still images.
//!
//! Every subdirectory of the image root is a stream. Each time an image in
//! it is written, Stillcast pushes it into that stream's encoder, which keeps
//! a rolling HLS playlist up to date under the output root.
//!
//! # Usage
//!
//! ```bash
//! # Serve two streams from ./images into ./stream
//! stillcast serve --stream lobby --stream porch
//!
//! # Provision streams as their image directories appear
//! IMAGE_PATH=/srv/images OUTPUT_PATH=/srv/hls stillcast serve --auto-provision
//!
//! # View configuration
//! stillcast config show
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;
mod logging;

/// Stillcast - live HLS streams from directories of still images.
#[derive(Parser, Debug)]
#[command(name = "stillcast")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "STILLCAST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the image root and serve live streams until interrupted
    Serve(cli::serve::ServeArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(stillcast_core::Config::default_path);

    // Logging isn't initialized yet, so use eprintln for config warnings.
    let config = if config_path.exists() {
        match stillcast_core::Config::load_from(&config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load config: {e}\n  \
                     Using default configuration. Check your config file with `stillcast config path`."
                );
                stillcast_core::Config::default()
            }
        }
    } else {
        stillcast_core::Config::default()
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Stillcast v{}", stillcast_core::VERSION);

    match cli.command {
        Commands::Serve(args) => cli::serve::execute(args, config).await,
        Commands::Config(args) => cli::config::execute(args, &config_path).await,
    }
}
