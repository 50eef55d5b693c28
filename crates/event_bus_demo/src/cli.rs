//! Command-line interface handling for the event bus demo.
//!
//! Every option overrides the matching setting of the configuration file.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the number of scenario rounds
    pub rounds: Option<u32>,
    /// Keep the main loop running after the scenario until Ctrl+C
    pub linger: bool,
    /// Disable supertype and marker matching
    pub no_inheritance: bool,
}

impl CliArgs {
    /// Parses the process arguments. Exits with usage on invalid input.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list, first item being the binary name.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("event_bus_demo.toml")),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            rounds: matches.get_one::<u32>("rounds").copied(),
            linger: matches.get_flag("linger"),
            no_inheritance: matches.get_flag("no-inheritance"),
        }
    }
}

fn command() -> Command {
    Command::new("Event Bus Demo")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Drives a scripted scenario through every delivery mode of the event bus")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("event_bus_demo.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("rounds")
                .short('r')
                .long("rounds")
                .value_name("N")
                .help("Number of download rounds to simulate")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("linger")
                .long("linger")
                .help("Keep running after the scenario until Ctrl+C")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-inheritance")
                .long("no-inheritance")
                .help("Match subscriptions by exact event type only")
                .action(clap::ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["event_bus_demo"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("event_bus_demo.toml"));
        assert_eq!(args.log_level, None);
        assert_eq!(args.rounds, None);
        assert!(!args.json_logs);
        assert!(!args.linger);
        assert!(!args.no_inheritance);
    }

    #[test]
    fn test_overrides() {
        let args = CliArgs::try_parse_from([
            "event_bus_demo",
            "--config",
            "custom.toml",
            "-l",
            "debug",
            "--json-logs",
            "--rounds",
            "7",
            "--linger",
            "--no-inheritance",
        ])
        .unwrap();
        assert_eq!(args.config_path, PathBuf::from("custom.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.rounds, Some(7));
        assert!(args.json_logs);
        assert!(args.linger);
        assert!(args.no_inheritance);
    }

    #[test]
    fn test_rejects_non_numeric_rounds() {
        assert!(CliArgs::try_parse_from(["event_bus_demo", "--rounds", "many"]).is_err());
    }
}
