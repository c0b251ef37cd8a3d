//! Command line argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ytarr - Fill Sonarr's missing episodes from yt-dlp sources
#[derive(Parser, Debug)]
#[command(name = "ytarr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: $CONFIGPATH or the user config directory)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Skip preflight checks
    #[arg(long, global = true)]
    pub skip_preflight: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan for missing episodes and download them
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,

        /// Print each cycle report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that yt-dlp and Sonarr are reachable
    Check,

    /// Inspect the download ledger
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum LedgerAction {
    /// List recorded downloads
    List {
        /// Only entries of this Sonarr series ID
        #[arg(long, value_name = "ID")]
        series: Option<u64>,

        /// Output as JSON lines
        #[arg(long)]
        json: bool,
    },
}
