mod cli;
mod config;
mod run;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use engine_logging::{engine_warn, level_for_verbosity, LogDestination};
use harvester_engine::ensure_output_dir;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Commands, ListArgs, RunArgs};
use crate::config::HarvestConfig;

const LOG_FILE_NAME: &str = "harvester.log";

fn main() -> ExitCode {
    let cli = Cli::parse();
    let outcome = match &cli.command {
        Commands::Run(args) => run_command(args, cli.verbose),
        Commands::List(args) => list_command(args),
    };
    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: &std::path::Path) -> anyhow::Result<HarvestConfig> {
    HarvestConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn run_command(args: &RunArgs, verbose: u8) -> anyhow::Result<ExitCode> {
    let mut config = load_config(&args.config)?;
    args.apply_to(&mut config);
    config.select(&args.only)?;
    config.validate()?;

    ensure_output_dir(&config.output_dir)?;
    let log_file = args
        .log_file
        .clone()
        .unwrap_or_else(|| config.output_dir.join(LOG_FILE_NAME));
    engine_logging::initialize(
        LogDestination::from(args.log),
        level_for_verbosity(verbose),
        Some(&log_file),
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting the async runtime")?;
    let report = runtime.block_on(async {
        let cancel = CancellationToken::new();
        let watcher = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                engine_warn!("interrupted; finishing in-flight pages");
                watcher.cancel();
            }
        });
        run::harvest(&config, cancel).await
    })?;

    print!("{}", run::render_report(&report));
    Ok(if report.failed() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn list_command(args: &ListArgs) -> anyhow::Result<ExitCode> {
    let config = load_config(&args.config)?;
    config.validate()?;
    print!("{}", run::render_sites(&config)?);
    Ok(ExitCode::SUCCESS)
}
