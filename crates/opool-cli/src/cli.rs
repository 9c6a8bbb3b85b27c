use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "opool",
    about = "Inspect and maintain object pool record files",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Record file: one JSON object mapping keys to record text
    #[arg(short, long, global = true, default_value = "pool.json")]
    pub store: PathBuf,

    /// Pool configuration (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show record counts, the root pointer and per-type totals
    Stats(StatsArgs),
    /// Print one stored record and the puuids it references
    Show(ShowArgs),
    /// Report unreachable and dangling records without changing anything
    Check(CheckArgs),
    /// Delete every record unreachable from the root
    Collect(CollectArgs),
}

#[derive(Args)]
pub struct StatsArgs {}

#[derive(Args)]
pub struct ShowArgs {
    /// Puuid of the record, or `root`
    pub pid: String,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Exit with an error if anything is unreachable or dangling
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args)]
pub struct CollectArgs {
    /// Only list what would be deleted
    #[arg(long)]
    pub dry_run: bool,
}
