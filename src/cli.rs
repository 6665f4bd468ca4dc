use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Staged crawler for institutional homepage video embeds
#[derive(Parser)]
#[command(name = "vidsift")]
#[command(about = "Crawl institution homepages and download embedded videos", long_about = None)]
pub struct Cli {
    /// Roster CSV with WEBADDR/INSTNM columns
    #[arg(long, default_value = "resource/crawler.csv")]
    pub roster: PathBuf,

    /// Root of the per-target output tree
    #[arg(long, default_value = "output")]
    pub out: PathBuf,

    /// Bound for concurrent targets and downloads
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Accept invalid TLS certificates when mirroring homepages
    #[arg(long)]
    pub insecure: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the roster from the raw institution survey CSV
    Roster {
        /// Survey CSV with at least WEBADDR and INSTNM columns
        survey: PathBuf,
    },
    /// Fetch and store each target's homepage
    Mirror,
    /// Extract, resolve and download videos from stored pages
    Harvest,
    /// Mirror then harvest in one pass
    Run,
}
