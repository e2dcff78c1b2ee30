use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use persist_types::Address;

#[derive(Parser)]
#[command(
    name = "persister",
    about = "Inspect and feed a content-addressed primitive cache",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Cache directory holding one file per primitive
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
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
    /// Replay the cache directory and report what survived verification
    Restore,
    /// Verify and store packed primitives read from files
    Ingest(IngestArgs),
    /// Show what the cache knows about an address
    Show(ShowArgs),
    /// Re-check every cached object against its address and signature
    Fsck,
}

#[derive(Args)]
pub struct IngestArgs {
    /// Files holding one packed primitive each
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Hex address of the primitive
    pub address: Address,
}
