//! mp709
//!
//! Switches MP709 USB HID relays on, off or over, and reports their state.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use common::{RusbBackend, resolve_log_level, setup_logging};
use config::RelayConfig;
use control::{FleetController, RelayError, TargetFilter};
use std::process::ExitCode;
use tracing::{debug, error, info_span};

/// Exit status for usage errors
const EXIT_USAGE: u8 = 2;
/// Exit status for every other failure
const EXIT_FAILURE: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "mp709")]
#[command(author, version, about = "Control MP709 USB HID relays")]
#[command(long_about = "
Control MP709 USB HID relays (VID 0x16C0, PID 0x05DF).

Every relay on the bus is switched to the requested state, or only the relay
whose id matches --id. The resulting state of each relay is logged at info
level, or printed as JSON lines with --json.

EXAMPLES:
    # Report the state of every relay
    mp709 -v

    # Switch all relays on
    mp709 --state on

    # Toggle the relay with id 3758
    mp709 --state toggle --id 3758

    # Print status records as JSON
    mp709 --json

CONFIGURATION:
    Defaults for state, id, timeout and log level are read from:
    1. Path specified with --config
    2. ~/.config/mp709/relay.toml
    3. /etc/mp709/relay.toml
    4. Built-in defaults

EXIT STATUS:
    0  success
    2  usage error
    3  failure, including an unknown state or no relay found
")]
struct Args {
    /// Target state: on, off, noChange, toggle
    #[arg(short, long, value_name = "STATE")]
    state: Option<String>,

    /// Relay id to control (0 = all relays)
    #[arg(short, long, value_name = "ID")]
    id: Option<u32>,

    /// Increase verbosity, repeatable (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Base log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Per-transfer timeout in milliseconds
    #[arg(short, long, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..=10_000))]
    timeout: Option<u64>,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration (to --config or the default location) and exit
    #[arg(long)]
    save_config: bool,

    /// Print status records to stdout as JSON lines
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.save_config {
        return match save_default_config(&args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                ExitCode::from(EXIT_FAILURE)
            }
        };
    }

    let config = match &args.config {
        Some(path) => config::load_config(path).context("Failed to load configuration"),
        None => Ok(RelayConfig::load_or_default()),
    };

    let base_level = args
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().map(|c| c.logging.log_level.clone()))
        .unwrap_or_else(|| RelayConfig::default().logging.log_level);

    let log_level = match resolve_log_level(&base_level, args.verbose) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if let Err(e) = setup_logging(log_level) {
        eprintln!("Error: Failed to setup logging: {}", e);
        return ExitCode::from(EXIT_FAILURE);
    }

    debug!("mp709 v{}", env!("CARGO_PKG_VERSION"));
    debug!("Log level: {}", log_level);

    let result = config.and_then(|config| run(&args, &config));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<RelayError>() {
            // Already logged by the controller
            Some(RelayError::UnknownState(_)) => ExitCode::from(EXIT_FAILURE),
            Some(RelayError::NoDeviceFound) => {
                error!("No relay found");
                ExitCode::from(EXIT_FAILURE)
            }
            _ => {
                error!("Failed: {:#}", e);
                ExitCode::from(EXIT_FAILURE)
            }
        },
    }
}

fn save_default_config(args: &Args) -> Result<()> {
    let path = match &args.config {
        Some(path) => config::expand_path(path),
        None => RelayConfig::default_path(),
    };
    RelayConfig::default()
        .save(&path)
        .context("Failed to save configuration")?;
    println!("Configuration saved to: {}", path.display());
    Ok(())
}

/// Resolve the request against the configuration and drive the relays
fn run(args: &Args, config: &RelayConfig) -> Result<()> {
    let filter = args.id.map(TargetFilter).unwrap_or_else(|| config.filter());

    let mut settings = config.settings();
    if let Some(ms) = args.timeout {
        settings.timeout = std::time::Duration::from_millis(ms);
    }

    let state_name = args
        .state
        .as_deref()
        .unwrap_or_else(|| config.relay.state.as_str());
    debug!(
        "Applying state {} to relays matching id {} (timeout {}ms)",
        state_name,
        filter,
        settings.timeout.as_millis()
    );

    let span = info_span!("mp709", state = state_name, id = %filter);
    let fleet = FleetController::new(RusbBackend::new(), settings, span);

    // Names given on the command line are checked before the bus is enumerated
    let statuses = match &args.state {
        Some(name) => fleet.run_named(name, filter)?,
        None => fleet.run(config.relay.state, filter)?,
    };

    if args.json {
        for status in &statuses {
            println!(
                "{}",
                serde_json::to_string(status).context("Failed to serialize status")?
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_short_flags() {
        let args =
            Args::try_parse_from(["mp709", "-s", "toggle", "-i", "3758", "-vv", "-t", "250"])
                .unwrap();

        assert_eq!(args.state.as_deref(), Some("toggle"));
        assert_eq!(args.id, Some(3758));
        assert_eq!(args.verbose, 2);
        assert_eq!(args.timeout, Some(250));
        assert!(!args.json);
    }

    #[test]
    fn test_defaults_left_to_config() {
        let args = Args::try_parse_from(["mp709"]).unwrap();

        assert!(args.state.is_none());
        assert!(args.id.is_none());
        assert!(args.timeout.is_none());
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn test_timeout_out_of_range_is_usage_error() {
        assert!(Args::try_parse_from(["mp709", "-t", "0"]).is_err());
        assert!(Args::try_parse_from(["mp709", "--timeout", "10001"]).is_err());
    }

    #[test]
    fn test_non_numeric_id_is_usage_error() {
        let err = Args::try_parse_from(["mp709", "--id", "relay"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        let args = Args::try_parse_from(["mp709", "--state", "blink"]).unwrap();
        let err = run(&args, &RelayConfig::default()).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RelayError>(),
            Some(RelayError::UnknownState(name)) if name == "blink"
        ));
    }
}
