mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cinder::RuntimeConfig;

#[derive(Parser)]
#[command(name = "cinder", version, about = "Expand definition programs with forward references")]
struct Cli {
    /// Runtime configuration (TOML)
    #[arg(short = 'c', long = "config", global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Expand a program without observable effects and list its definitions
    Check {
        /// Program as a JSON array of forms
        file: PathBuf,
    },
    /// Expand a program, then perform its observable effects
    Run {
        /// Program as a JSON array of forms
        file: PathBuf,
    },
}

pub(crate) fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    init_tracing(&config);

    match cli.command {
        Command::Check { file } => commands::cmd_check(&config, &file),
        Command::Run { file } => commands::cmd_run(&config, &file),
    }
}

/// `CINDER_LOG` wins over the configured filter.
fn init_tracing(config: &RuntimeConfig) {
    let filter = EnvFilter::try_from_env("CINDER_LOG")
        .or_else(|_| EnvFilter::try_new(&config.log.filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
