//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// CDC Router - rule-based dispatch of database change records
#[derive(Parser, Debug)]
#[command(
    name = "cdc-router",
    author,
    version,
    about = "Rule-based routing of CDC change records",
    long_about = "Routes change-data-capture records to destinations.\n\n\
                  Loads destinations and routing rules from configuration, evaluates \n\
                  every rule per change, and delivers to each selected destination \n\
                  in isolation."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "CDC_ROUTER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "CDC_ROUTER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Route change records from a JSON Lines file
    Route(RouteArgs),

    /// Validate configuration file without routing
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `route` command
#[derive(Parser, Debug, Clone)]
pub struct RouteArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "router.toml", env = "CDC_ROUTER_CONFIG")]
    pub config: PathBuf,

    /// JSON Lines file with one change record per line
    #[arg(short, long, env = "CDC_ROUTER_INPUT")]
    pub input: PathBuf,

    /// Table name for lines without a `table` field
    #[arg(short, long)]
    pub table: Option<String>,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "CDC_ROUTER_METRICS_PORT")]
    pub metrics_port: u16,

    /// Output the routing report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "router.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "router.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show detailed rule information
    #[arg(long)]
    pub rules: bool,

    /// Show destination configuration
    #[arg(long)]
    pub destinations: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}
