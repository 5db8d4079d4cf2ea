use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use engine_logging::LogDestination;

use crate::config::HarvestConfig;

/// Top-level CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "harvester",
    version,
    about = "Harvest staff directories from paginated school websites"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// Increase logging verbosity (-v, -vv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Harvest every configured site and write JSON/CSV output.
    Run(RunArgs),
    /// Validate the configuration and list its sites.
    List(ListArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogTarget {
    Terminal,
    File,
    Both,
}

impl From<LogTarget> for LogDestination {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::File => LogDestination::File,
            LogTarget::Both => LogDestination::Both,
        }
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// RON file describing the sites to harvest.
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,
    /// Directory for output files (overrides the config file).
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,
    /// Only harvest sites with this name or file base name (repeatable).
    #[arg(long, value_name = "SITE")]
    pub only: Vec<String>,
    /// Number of sites harvested at once.
    #[arg(long, value_name = "N")]
    pub job_batch: Option<usize>,
    /// Pages fetched at once per site, for every site.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,
    /// Write the combined output under this base name.
    #[arg(long, value_name = "NAME")]
    pub combined: Option<String>,
    /// Put records with an email first in the combined output.
    #[arg(long)]
    pub email_first: bool,
    /// Skip the per-site `.summary.json` manifests.
    #[arg(long)]
    pub no_manifest: bool,
    /// Where log output goes.
    #[arg(long, value_enum, default_value_t = LogTarget::Terminal)]
    pub log: LogTarget,
    /// Log file path (defaults to `harvester.log` in the output directory).
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

impl RunArgs {
    /// Flags win over the file; the file wins over built-in defaults.
    pub fn apply_to(&self, config: &mut HarvestConfig) {
        if let Some(dir) = &self.output {
            config.output_dir = dir.clone();
        }
        if let Some(size) = self.job_batch {
            config.job_batch = size;
        }
        if let Some(concurrency) = self.concurrency {
            for site in &mut config.sites {
                site.concurrency = Some(concurrency);
            }
        }
        if let Some(base_name) = &self.combined {
            let combined = config.combined.get_or_insert_with(Default::default);
            combined.base_name = base_name.clone();
        }
        if self.email_first {
            let combined = config.combined.get_or_insert_with(Default::default);
            combined.email_first = true;
        }
        if self.no_manifest {
            config.manifest = false;
        }
    }
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// RON file describing the sites.
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,
}
