//! Command-line parsing for the `botlink` binary.

use crate::config::Role;
use bot_protocol::TenantId;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

/// Which half of the control channel to run, with its CLI overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Agent {
        coordinator_address: Option<String>,
        tenant_id: Option<TenantId>,
    },
    Coordinator {
        bind_address: Option<String>,
        max_sessions: Option<usize>,
    },
}

impl Mode {
    pub fn role(&self) -> Role {
        match self {
            Mode::Agent { .. } => Role::Agent,
            Mode::Coordinator { .. } => Role::Coordinator,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub log_level: Option<String>,
    pub json_logs: bool,
    pub mode: Mode,
}

fn command() -> Command {
    Command::new("botlink")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Persistent control channel between game-server bots and a coordinator")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("botlink.toml")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .global(true),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("agent")
                .about("Run an agent that keeps a game server connected to the coordinator")
                .arg(
                    Arg::new("coordinator")
                        .long("coordinator")
                        .value_name("ADDRESS")
                        .help("Coordinator address (e.g., 10.0.0.5:7000)"),
                )
                .arg(
                    Arg::new("tenant")
                        .short('t')
                        .long("tenant")
                        .value_name("ID")
                        .help("Tenant id this agent represents")
                        .value_parser(value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("coordinator")
                .about("Run the coordinator that accepts agents and dispatches commands")
                .arg(
                    Arg::new("bind")
                        .short('b')
                        .long("bind")
                        .value_name("ADDRESS")
                        .help("Bind address (e.g., 0.0.0.0:7000)"),
                )
                .arg(
                    Arg::new("max-sessions")
                        .long("max-sessions")
                        .value_name("COUNT")
                        .help("Maximum number of registered tenants")
                        .value_parser(value_parser!(usize)),
                ),
        )
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        let mode = match matches.subcommand() {
            Some(("coordinator", sub)) => Mode::Coordinator {
                bind_address: sub.get_one::<String>("bind").cloned(),
                max_sessions: sub.get_one::<usize>("max-sessions").copied(),
            },
            Some(("agent", sub)) => Mode::Agent {
                coordinator_address: sub.get_one::<String>("coordinator").cloned(),
                tenant_id: sub.get_one::<u64>("tenant").copied(),
            },
            // `subcommand_required` rules out anything else.
            _ => Mode::Agent {
                coordinator_address: None,
                tenant_id: None,
            },
        };

        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("botlink.toml")),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_overrides() {
        let args = CliArgs::try_parse_from([
            "botlink",
            "agent",
            "--coordinator",
            "10.0.0.5:7000",
            "--tenant",
            "42",
            "--json-logs",
        ])
        .unwrap();

        assert_eq!(args.config_path, PathBuf::from("botlink.toml"));
        assert!(args.json_logs);
        assert_eq!(
            args.mode,
            Mode::Agent {
                coordinator_address: Some("10.0.0.5:7000".to_string()),
                tenant_id: Some(42),
            }
        );
    }

    #[test]
    fn test_coordinator_with_global_flags_before_subcommand() {
        let args = CliArgs::try_parse_from([
            "botlink",
            "--config",
            "/etc/botlink.toml",
            "-l",
            "debug",
            "coordinator",
            "--bind",
            "0.0.0.0:7000",
        ])
        .unwrap();

        assert_eq!(args.config_path, PathBuf::from("/etc/botlink.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(
            args.mode,
            Mode::Coordinator {
                bind_address: Some("0.0.0.0:7000".to_string()),
                max_sessions: None,
            }
        );
    }

    #[test]
    fn test_rejects_bad_tenant_and_missing_subcommand() {
        assert!(CliArgs::try_parse_from(["botlink", "agent", "--tenant", "abc"]).is_err());
        assert!(CliArgs::try_parse_from(["botlink"]).is_err());
    }
}
