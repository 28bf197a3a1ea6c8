#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]

mod commands;
mod logging;

use clap::{Parser, ValueEnum};
use ied_core::{Config, LogFormat};
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ied")]
#[command(author, version, about = "A package manager for CommonJS modules", long_about = None)]
struct Cli {
    /// Lower the log threshold (-v for one level, -vv for two)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format (overrides the config file)
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormatArg>,

    /// Config file to read instead of ~/.ied.yaml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Registry root URL (overrides config and IED_REGISTRY)
    #[arg(long, global = true, value_name = "URL")]
    registry: Option<String>,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install packages into ./node_modules
    Install {
        /// Packages to install (e.g., "left-pad", "left-pad@^1.0.0", "@types/node@20")
        #[arg(required = true, value_name = "SPEC")]
        specs: Vec<String>,

        /// Maximum number of concurrent resolve/fetch operations
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,
    },

    /// Check that the configured registry is reachable
    Ping,

    /// Print the effective configuration as JSON
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogFormatArg {
    Json,
    Text,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => Self::Json,
            LogFormatArg::Text => Self::Text,
        }
    }
}

/// Layer the config file, the environment and command-line flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path().into_diagnostic()?,
    };

    let mut config = Config::load(&path).into_diagnostic()?.with_env_overrides();
    if let Some(registry) = &cli.registry {
        config = config.with_registry(registry.clone());
    }
    if let Some(format) = cli.log_format {
        config = config.with_log_format(format.into());
    }
    let level = config.log_level.raised_by(cli.verbose);
    config = config.with_log_level(level);

    config.validate().into_diagnostic()?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = load_config(&cli)?;
    logging::init(config.log_level, config.log_format);

    match &cli.command {
        Commands::Install { specs, concurrency } => {
            commands::install::run(&cwd, &config, specs, *concurrency)
        }
        Commands::Ping => commands::ping::run(&config),
        Commands::Config => commands::config::run(&config),
    }
}
