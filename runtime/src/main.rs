// Copyright 2026 bili-harvest contributors
// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use bili_engagement::RANKING_URL;
use bili_harvest_runtime::{cli, config};

#[derive(Parser)]
#[command(
    name = "bili-harvest",
    about = "Harvest engagement data, comments and captions from Bilibili videos",
    version,
    after_help = "Run 'bili-harvest <command> --help' for details on each command."
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Render pages over plain HTTP instead of headless Chromium
    #[arg(long, global = true)]
    no_browser: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest videos and write one JSON line per id to stdout
    Crawl {
        /// Video ids or video URLs
        ids: Vec<String>,
        /// File with one id or URL per line
        #[arg(long)]
        ids_file: Option<PathBuf>,
    },
    /// Show every extraction source's view of one video
    Probe {
        /// Video id, e.g. BV1xx411c7mD
        id: String,
    },
    /// List video ids linked from a ranking page
    Discover {
        /// Page to scan
        #[arg(long, default_value = RANKING_URL)]
        url: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the exported records.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "bili-harvest", &mut std::io::stdout());
        return Ok(());
    }

    let config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Crawl { ids, ids_file } => {
            cli::crawl_cmd::run(&config, &ids, ids_file.as_deref(), cli.no_browser).await
        }
        Commands::Probe { id } => cli::probe_cmd::run(&config, &id, cli.no_browser).await,
        Commands::Discover { url } => cli::discover_cmd::run(&config, &url, cli.no_browser).await,
        Commands::Completions { .. } => Ok(()),
    }
}
