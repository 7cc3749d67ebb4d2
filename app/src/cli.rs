//! Command-line interface definition.

use clap::{Args, Parser, Subcommand};
use leadscrape_core::ScrapingConfig;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "leadscrape", version, about = "Map-search lead extraction")]
pub struct Cli {
    /// Config file to use instead of the platform default
    #[arg(long, global = true, env = "LEADSCRAPE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a new scrape session
    Run(RunArgs),
    /// Resume a paused or interrupted session
    Resume {
        session_id: String,
        /// Pause on the first Ctrl-C instead of stopping
        #[arg(long)]
        pause_on_interrupt: bool,
    },
    /// Show one session in detail, or list all sessions
    Status {
        session_id: Option<String>,
    },
    /// Write a session's businesses to a spreadsheet
    Export {
        session_id: String,
        /// Directory for the workbook
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Resolve carriers for a stopped session
    Lookup {
        session_id: String,
    },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Towns to search, comma separated (at most 5)
    #[arg(long, short, value_delimiter = ',', required = true)]
    pub towns: Vec<String>,

    /// Industries to search in every town, comma separated (at most 3)
    #[arg(long, short, value_delimiter = ',', required = true)]
    pub industries: Vec<String>,

    /// Towns processed at once
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
    pub simultaneous_towns: Option<u8>,

    /// Industry searches per browser
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3))]
    pub simultaneous_industries: Option<u8>,

    /// Carrier lookup lanes
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3))]
    pub simultaneous_lookups: Option<u8>,

    /// Skip the carrier lookup phase
    #[arg(long)]
    pub no_lookup: bool,

    /// Export the workbook into this directory once the session ends
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Pause on the first Ctrl-C so the session can be resumed later; a
    /// second Ctrl-C stops it
    #[arg(long)]
    pub pause_on_interrupt: bool,
}

impl RunArgs {
    /// Apply the flags given on the command line over the configured defaults.
    pub fn overlay(&self, defaults: &ScrapingConfig) -> ScrapingConfig {
        ScrapingConfig {
            simultaneous_towns: self
                .simultaneous_towns
                .unwrap_or(defaults.simultaneous_towns),
            simultaneous_industries: self
                .simultaneous_industries
                .unwrap_or(defaults.simultaneous_industries),
            simultaneous_lookups: self
                .simultaneous_lookups
                .unwrap_or(defaults.simultaneous_lookups),
            lookup_enabled: defaults.lookup_enabled && !self.no_lookup,
            ..defaults.clone()
        }
    }
}
