//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::producer::PermissionPolicy;

/// Capture command arguments.
#[derive(Debug, Args)]
pub struct CaptureCommand {
    /// Latitude to report (overrides configuration)
    #[arg(long, requires = "lng", allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Longitude to report (overrides configuration)
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    pub lng: Option<f64>,

    /// Device identity stamped on the record
    #[arg(short, long)]
    pub device: Option<String>,

    /// Grant location permission without prompting
    #[arg(long, conflicts_with = "deny")]
    pub allow: bool,

    /// Refuse location permission
    #[arg(long)]
    pub deny: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: OutputFormat,
}

impl CaptureCommand {
    /// Permission policy requested on the command line, if any.
    #[must_use]
    pub fn permission(&self) -> Option<PermissionPolicy> {
        if self.allow {
            Some(PermissionPolicy::Granted)
        } else if self.deny {
            Some(PermissionPolicy::Denied)
        } else {
            None
        }
    }
}

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Watch command arguments.
#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Poll interval for changes made by other processes, in milliseconds
    #[arg(long, value_name = "MS")]
    pub interval: Option<u64>,
}

/// Remove command arguments.
#[derive(Debug, Args)]
pub struct RemoveCommand {
    /// Identifier of the record to delete
    pub id: String,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Map command arguments.
#[derive(Debug, Args)]
pub struct MapCommand {
    /// Identifier of the record to focus on
    pub id: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: OutputFormat,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}
