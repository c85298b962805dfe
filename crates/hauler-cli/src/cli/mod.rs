//! CLI for the hauler bulk transfer engine.

mod commands;
mod list;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hauler_core::config;
use std::path::Path;

use commands::{run_checksum, run_config, run_fetch, FetchOptions};

/// Top-level CLI for hauler.
#[derive(Debug, Parser)]
#[command(name = "hauler")]
#[command(about = "hauler: adaptive concurrent bulk file transfer", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch every entry of a JSON transfer list.
    Fetch {
        /// JSON array of `{url, path, sha256?, size?, reason?}` entries.
        list: String,
        /// Override the network concurrency ceiling.
        #[arg(long, value_name = "N")]
        network: Option<usize>,
        /// Override the disk I/O concurrency ceiling.
        #[arg(long, value_name = "N")]
        io: Option<usize>,
        /// Verify SHA-256 of completed entries that carry one.
        #[arg(long)]
        verify: bool,
    },

    /// Compute SHA-256 of a file.
    Checksum {
        /// Path to the file.
        path: String,
    },

    /// Show the config file path and the effective configuration.
    Config,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Fetch {
                list,
                network,
                io,
                verify,
            } => {
                let cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                let opts = FetchOptions {
                    network,
                    io,
                    verify,
                };
                run_fetch(cfg, Path::new(&list), opts).await?;
            }
            CliCommand::Checksum { path } => run_checksum(Path::new(&path)).await?,
            CliCommand::Config => run_config()?,
        }

        Ok(())
    }
}
