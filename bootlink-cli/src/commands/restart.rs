//! Restart command implementation.

use anyhow::{Context, Result};
use bootlink::{NativePort, SerialConfig, Uploader};
use console::style;
use log::debug;

use crate::config::Config;
use crate::{Cli, get_baud, get_port};

/// Pulse the restart line to reboot whatever is currently running.
pub(crate) fn cmd_restart(cli: &Cli, config: &Config) -> Result<()> {
    let port_name = get_port(cli, config)?;
    let baud = get_baud(cli, config);

    debug!("Opening {port_name} @ {baud} baud for restart pulse");
    let port = NativePort::open(&SerialConfig::new(&port_name, baud))
        .with_context(|| format!("Failed to open port {port_name}"))?;

    let mut uploader = Uploader::new(port);
    uploader.pulse_restart().context("Restart pulse failed")?;

    eprintln!(
        "{} Restart pulse sent to {}",
        style("✓").green(),
        style(&port_name).green()
    );
    Ok(())
}
