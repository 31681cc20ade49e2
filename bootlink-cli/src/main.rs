//! bootlink CLI - push firmware to a serial-attached bootloader and watch
//! its log output.
//!
//! ## Features
//!
//! - Flash line-oriented hex-word firmware sources
//! - Live log monitor with severity-coloured output
//! - Manual device restart pulse
//! - Firmware source inspection (`info`, optionally as JSON)
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::debug;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// Default baud rate when neither flag, environment, nor config names one.
const DEFAULT_BAUD: u32 = 115200;

/// Set by the Ctrl+C handler; polled by long-running loops.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether Ctrl+C was pressed since the last clear.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

pub(crate) fn clear_interrupted_flag() {
    INTERRUPTED.store(false, Ordering::Relaxed);
}

/// bootlink - host-side driver for a serial-attached firmware bootloader.
///
/// Environment variables:
///   BOOTLINK_PORT   - Default serial port
///   BOOTLINK_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "bootlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM3).
    #[arg(short, long, global = true, env = "BOOTLINK_PORT")]
    port: Option<String>,

    /// Baud rate for the link.
    #[arg(short, long, global = true, env = "BOOTLINK_BAUD")]
    baud: Option<u32>,

    /// Increase log detail (-v debug, -vv trace with targets).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors; hide progress output.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable interactive behavior (keyboard handling, animated progress).
    #[arg(long, global = true, env = "BOOTLINK_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Read configuration from this file instead of the usual locations.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Flash a hex-word firmware source to the device.
    Flash {
        /// Path to the firmware source (one 32-bit hex word per line).
        /// Defaults to the source remembered by a previous `--remember`.
        image: Option<PathBuf>,

        /// Skip the reset pulse before uploading.
        #[arg(long)]
        no_reset: bool,

        /// Remember this port and baud rate for next time.
        #[arg(long)]
        remember: bool,

        /// Open the log monitor after flashing.
        #[arg(long)]
        monitor: bool,
    },

    /// Watch the device's log output.
    Monitor {
        /// Quiet interval in milliseconds before an unterminated fragment
        /// is shown anyway.
        #[arg(long, default_value = "200")]
        quiet_ms: u64,

        /// Prefix each message with a capture timestamp.
        #[arg(long)]
        timestamp: bool,

        /// Append raw message text to this file.
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Pulse the restart line to reboot the running program.
    Restart,

    /// Show information about a firmware source without flashing it.
    Info {
        /// Path to the firmware source.
        image: PathBuf,

        /// Emit the summary as JSON on stdout.
        #[arg(long)]
        json: bool,
    },
}

/// CLI-level errors with exit-code semantics.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid usage (exit code 2).
    #[error("{0}")]
    Usage(String),

    /// Operation cancelled by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// Map an error chain to a process exit code.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Cancelled(_)) => 130,
        None => 1,
    }
}

/// Resolve the serial port from flag/env or the config file.
pub(crate) fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    if let Some(ref port) = cli.port {
        return Ok(port.clone());
    }
    if let Some(ref port) = config.connection.serial {
        debug!("Using port from config: {port}");
        return Ok(port.clone());
    }
    Err(CliError::Usage(
        "no serial port specified (use --port, BOOTLINK_PORT, or bootlink.toml)".to_string(),
    )
    .into())
}

/// Resolve the baud rate from flag/env, config, or the default.
pub(crate) fn get_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD)
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "bootlink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let _ = ctrlc::set_handler(|| {
        INTERRUPTED.store(true, Ordering::Relaxed);
    });

    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    let result = match &cli.command {
        Commands::Flash {
            image,
            no_reset,
            remember,
            monitor,
        } => commands::flash::cmd_flash(
            &cli,
            &mut config,
            image.as_deref(),
            *no_reset,
            *remember,
            *monitor,
        ),
        Commands::Monitor {
            quiet_ms,
            timestamp,
            log_file,
        } => commands::monitor::cmd_monitor(
            &cli,
            &config,
            *quiet_ms,
            *timestamp,
            log_file.as_deref(),
        ),
        Commands::Restart => commands::restart::cmd_restart(&cli, &config),
        Commands::Info { image, json } => commands::info::cmd_info(&cli, image, *json),
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        std::process::exit(exit_code_for(&err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_code_mapping() {
        let usage: anyhow::Error = CliError::Usage("bad".into()).into();
        assert_eq!(exit_code_for(&usage), 2);

        let cancelled: anyhow::Error = CliError::Cancelled("stop".into()).into();
        assert_eq!(exit_code_for(&cancelled), 130);

        let other = anyhow::anyhow!("boom");
        assert_eq!(exit_code_for(&other), 1);
    }

    #[test]
    fn test_get_baud_precedence() {
        let cli = Cli::parse_from(["bootlink", "--baud", "921600", "restart"]);
        let mut config = Config::default();
        config.connection.baud = Some(9600);
        assert_eq!(get_baud(&cli, &config), 921600);

        let cli = Cli::parse_from(["bootlink", "restart"]);
        assert_eq!(get_baud(&cli, &config), 9600);

        assert_eq!(get_baud(&cli, &Config::default()), DEFAULT_BAUD);
    }

    #[test]
    fn test_get_port_errors_without_any_source() {
        let cli = Cli::parse_from(["bootlink", "restart"]);
        let err = get_port(&cli, &Config::default()).unwrap_err();
        assert_eq!(exit_code_for(&err), 2);
    }
}
