mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use cache_rs::errata::CacheError;

use crate::cli::Cli;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let level = match (cli.quiet, cli.verbose) {
        (true, _) => LevelFilter::WARN,
        (false, 0) => LevelFilter::INFO,
        (false, 1) => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let config = cli.tool_config();
    info!(command = ?cli.command, write = config.write_enabled, "starting");

    let zret = commands::run(&cli, config)?;
    if !zret.is_empty() {
        eprint!("{zret}");
    }

    // Only a missing prerequisite makes the run a failure; everything else is reported.
    if zret.iter().any(|e| matches!(e, CacheError::Input(_))) {
        warn!("required input missing");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
