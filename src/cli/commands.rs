use clap::{Arg, ArgMatches, Command};
use log::info;
use std::path::PathBuf;

use crate::config::Config;
use crate::services::Pipeline;
use crate::utils::error::GatewayError;

pub const DEFAULT_CONFIG_PATH: &str = "meter-gateway.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliAction {
    Run { config_path: PathBuf },
    PrintDefaultConfig,
}

impl CliAction {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        match matches.subcommand_name() {
            Some("default-config") => CliAction::PrintDefaultConfig,
            _ => CliAction::Run {
                config_path: matches
                    .get_one::<String>("config")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            },
        }
    }
}

pub fn build_cli() -> Command {
    Command::new("meter-gateway")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Polls Modbus power meters and relays readings to MQTT and InfluxDB")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .default_value(DEFAULT_CONFIG_PATH)
                .global(true)
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .global(true)
                .help("Log level when RUST_LOG is not set"),
        )
        .subcommand(Command::new("run").about("Run every configured source and sink (default)"))
        .subcommand(Command::new("default-config").about("Print a default configuration file"))
}

pub fn log_level(matches: &ArgMatches) -> &str {
    matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info")
}

/// Runs `action`. Returns `false` when any task ended with an error.
pub fn execute(action: &CliAction) -> Result<bool, GatewayError> {
    match action {
        CliAction::PrintDefaultConfig => {
            print!("{}", Config::example().to_toml_string()?);
            Ok(true)
        }
        CliAction::Run { config_path } => {
            let config = Config::from_file(config_path)?;
            let mut pipeline = Pipeline::from_config(&config)?;

            pipeline.run_all();
            let report = pipeline.wait_all();
            pipeline.term_all();

            info!("👋 All tasks stopped");
            Ok(report.is_success())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let matches = build_cli().try_get_matches_from(["meter-gateway"]).unwrap();
        assert_eq!(
            CliAction::from_matches(&matches),
            CliAction::Run {
                config_path: PathBuf::from(DEFAULT_CONFIG_PATH)
            }
        );
        assert_eq!(log_level(&matches), "info");
    }

    #[test]
    fn test_run_with_options() {
        let matches = build_cli()
            .try_get_matches_from(["meter-gateway", "run", "--config", "/etc/gw.toml", "-l", "debug"])
            .unwrap();
        assert_eq!(
            CliAction::from_matches(&matches),
            CliAction::Run {
                config_path: PathBuf::from("/etc/gw.toml")
            }
        );
        assert_eq!(log_level(&matches), "debug");
    }

    #[test]
    fn test_default_config_subcommand() {
        let matches = build_cli()
            .try_get_matches_from(["meter-gateway", "default-config"])
            .unwrap();
        assert_eq!(CliAction::from_matches(&matches), CliAction::PrintDefaultConfig);
        assert!(execute(&CliAction::PrintDefaultConfig).unwrap());
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        assert!(build_cli()
            .try_get_matches_from(["meter-gateway", "--log-level", "loud"])
            .is_err());
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let action = CliAction::Run {
            config_path: PathBuf::from("/nonexistent/meter-gateway.toml"),
        };
        assert!(matches!(execute(&action), Err(GatewayError::Config(_))));
    }
}
