//! Command-line interface for geofeed.
//!
//! This module provides the CLI structure for the `geofeed` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CaptureCommand, ConfigCommand, ListCommand, MapCommand, OutputFormat, RemoveCommand,
    WatchCommand,
};

/// geofeed - Share locations into a live, shared record feed
///
/// Capture this device's location into a shared store, and watch, inspect or
/// remove the records everyone has shared.
#[derive(Debug, Parser)]
#[command(name = "geofeed")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Capture this device's location and append it to the feed
    Capture(CaptureCommand),

    /// Print the current records once
    List(ListCommand),

    /// Show the records and keep updating until interrupted
    Watch(WatchCommand),

    /// Delete a record after confirmation
    Remove(RemoveCommand),

    /// Focus the map on one record
    Map(MapCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "geofeed");
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_flags() {
        use crate::logging::Verbosity;

        assert_eq!(parse(&["geofeed", "list"]).verbosity(), Verbosity::Normal);
        assert_eq!(parse(&["geofeed", "-q", "list"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["geofeed", "-v", "list"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["geofeed", "-vv", "list"]).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_capture_with_coordinates() {
        let cli = parse(&[
            "geofeed", "capture", "--lat", "31.5204", "--lng", "-74.3587", "--device", "iPhone",
        ]);
        let Command::Capture(cmd) = cli.command else {
            panic!("expected capture");
        };
        assert_eq!(cmd.lat, Some(31.5204));
        assert_eq!(cmd.lng, Some(-74.3587));
        assert_eq!(cmd.device.as_deref(), Some("iPhone"));
    }

    #[test]
    fn test_capture_requires_both_coordinates() {
        assert!(Cli::try_parse_from(["geofeed", "capture", "--lat", "1.0"]).is_err());
    }

    #[test]
    fn test_capture_allow_and_deny_conflict() {
        assert!(Cli::try_parse_from(["geofeed", "capture", "--allow", "--deny"]).is_err());
    }

    #[test]
    fn test_parse_list_defaults_to_table() {
        let Command::List(cmd) = parse(&["geofeed", "list"]).command else {
            panic!("expected list");
        };
        assert_eq!(cmd.format, OutputFormat::Table);
    }

    #[test]
    fn test_parse_watch_json() {
        let Command::Watch(cmd) = parse(&["geofeed", "watch", "--format", "json"]).command else {
            panic!("expected watch");
        };
        assert_eq!(cmd.format, OutputFormat::Json);
        assert!(cmd.interval.is_none());
    }

    #[test]
    fn test_parse_remove() {
        let Command::Remove(cmd) = parse(&["geofeed", "remove", "r7", "--yes"]).command else {
            panic!("expected remove");
        };
        assert_eq!(cmd.id, "r7");
        assert!(cmd.yes);
    }

    #[test]
    fn test_parse_map() {
        let cli = parse(&["geofeed", "map", "r1"]);
        assert!(matches!(cli.command, Command::Map(MapCommand { ref id, .. }) if id == "r1"));
    }

    #[test]
    fn test_parse_config_validate() {
        let cli = parse(&["geofeed", "config", "validate", "-f", "/tmp/x.toml"]);
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }

    #[test]
    fn test_parse_with_config() {
        let cli = parse(&["geofeed", "-c", "/custom/config.toml", "list"]);
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }
}
