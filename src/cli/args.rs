//! Command-line argument parsing for the mirror director
//!
//! This module defines the CLI structure using clap derive macros: one-off
//! resolutions, health sweeps, the long-running monitor and cache
//! maintenance.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Mirror Director - send downloads to the best mirror
#[derive(Parser, Debug)]
#[command(
    name = "mirror-director",
    version,
    about = "Redirect downloads to the closest healthy mirror",
    long_about = "Resolves repository files to the closest mirror holding them, tracking mirror
health and caching probe outcomes so requests rarely touch the network."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Mirror topology file (overrides `topology_path`)
    #[arg(long, global = true, value_name = "FILE")]
    pub topology: Option<PathBuf>,

    /// Cache database file (overrides `cache.database_path`)
    #[arg(long, global = true, value_name = "FILE")]
    pub database: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve one file for a requester
    Resolve(ResolveArgs),

    /// Run one health sweep over every mirror
    Scan(ScanArgs),

    /// Run the health monitor until interrupted
    Monitor(MonitorArgs),

    /// Synchronize the cache's file set with a repository directory
    Inventory(InventoryArgs),

    /// Cache inspection and maintenance
    Cache(CacheArgs),
}

/// Arguments for the resolve command
#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
    /// Repository-relative file path (e.g. "pool/main/a.deb")
    pub path: String,

    /// Requester country code
    #[arg(long, conflicts_with = "ip")]
    pub country: Option<String>,

    /// Requester continent code
    #[arg(long, conflicts_with = "ip")]
    pub continent: Option<String>,

    /// Requester address, located with the configured geo table
    #[arg(long)]
    pub ip: Option<IpAddr>,

    /// Wait for the background search and print its outcome
    #[arg(short, long)]
    pub wait: bool,
}

/// Arguments for the scan command
#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the monitor command
#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    /// Reconcile the cache with this repository before monitoring
    #[arg(short, long, value_name = "DIR", conflicts_with = "master")]
    pub repository: Option<PathBuf>,

    /// Reconcile the cache with the index of this master mirror
    #[arg(long, value_name = "URL")]
    pub master: Option<String>,
}

/// Arguments for the inventory command
#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    /// Repository root
    #[arg(value_name = "DIR", required_unless_present = "master", conflicts_with = "master")]
    pub dir: Option<PathBuf>,

    /// Take the file set and its version from the index of this master mirror
    #[arg(long, value_name = "URL")]
    pub master: Option<String>,
}

/// Arguments for cache management
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache management actions
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show cache statistics
    Stats {
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// List known files
    Files,

    /// Delete records whose file or mirror is gone
    Prune,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
}

impl ResolveArgs {
    /// Requester location given on the command line, as (country, continent)
    pub fn location(&self) -> (String, String) {
        (
            self.country.clone().unwrap_or_default(),
            self.continent.clone().unwrap_or_default(),
        )
    }
}
