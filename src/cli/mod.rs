//! Command-line interface definitions and dispatch.

mod addins;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "promptlab")]
#[command(about = "Prompt-engineering research toolkit: analytics add-ins", long_about = None)]
pub(crate) struct Cli {
    /// Path to the analytics config file (default: ~/.promptlab/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Discover, validate and run analytics add-ins
    Addins {
        #[command(subcommand)]
        action: AddinAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub(crate) enum AddinAction {
    /// List registered add-ins and discovery failures
    List {
        /// Manifest directories to scan (overrides config)
        #[arg(short, long = "dir")]
        dirs: Vec<PathBuf>,
        /// Print manifests as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the entry point paths a manifest can refer to
    EntryPoints,
    /// Validate manifest files or directories of manifests
    Validate {
        /// Manifest files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Check a data file against an add-in's declared input types
    CheckData {
        /// Registered add-in name
        name: String,
        /// JSON data file (array of records, list, or object)
        #[arg(long)]
        data: PathBuf,
        /// Manifest directories to scan (overrides config)
        #[arg(short, long = "dir")]
        dirs: Vec<PathBuf>,
    },
    /// Run an add-in over a data file
    Run {
        /// Registered add-in name
        name: String,
        /// JSON data file (array of records, list, or object)
        #[arg(long)]
        data: PathBuf,
        /// Add-in option as key=value (repeatable)
        #[arg(short, long = "opt")]
        opts: Vec<String>,
        /// Wall-clock budget in seconds (overrides config)
        #[arg(long)]
        timeout: Option<u64>,
        /// Manifest directories to scan (overrides config)
        #[arg(short, long = "dir")]
        dirs: Vec<PathBuf>,
    },
}

pub(crate) async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Version) | None => {
            println!("promptlab {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Addins { action }) => {
            let config = addins::load_config(cli.config.as_deref())?;
            match action {
                AddinAction::List { dirs, json } => addins::cmd_list(&config, &dirs, json),
                AddinAction::EntryPoints => addins::cmd_entry_points(),
                AddinAction::Validate { paths } => addins::cmd_validate(&paths),
                AddinAction::CheckData { name, data, dirs } => {
                    addins::cmd_check_data(&config, &dirs, &name, &data)
                }
                AddinAction::Run {
                    name,
                    data,
                    opts,
                    timeout,
                    dirs,
                } => addins::cmd_run(&config, &dirs, &name, &data, &opts, timeout).await,
            }
        }
    }
}
