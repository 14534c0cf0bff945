mod cli;
mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use picorg::config::load_effective_config;
use tracing::{debug, error};

use cli::Cli;

fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(e) = logging::init_logging(args.verbose, args.log_json) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Cli) -> anyhow::Result<ExitCode> {
    let config_path = args.config.clone().or_else(default_config_path);
    debug!("Config file: {:?}", config_path);
    let config = load_effective_config(config_path.as_deref())?;

    commands::dispatch(args.command, config)
}

/// `~/.picorg/config.json`, if it exists.
fn default_config_path() -> Option<PathBuf> {
    let path = dirs::home_dir()?.join(".picorg").join("config.json");
    path.try_exists().unwrap_or(false).then_some(path)
}
