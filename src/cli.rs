//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Salesforce Apex REST client - connection and configuration tooling
#[derive(Parser, Debug)]
#[command(name = "salesforce-apex")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "SALESFORCE_APEX_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "SALESFORCE_APEX_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "SALESFORCE_APEX_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate configured connections and print them with secrets masked
    ConfigTest {
        /// Validate a single connection instead of all of them
        #[arg(short = 'n', long)]
        connection: Option<String>,
    },
}
