//! Flash command implementation.

use anyhow::{Context, Result};
use bootlink::{FirmwareFrame, NativePort, SerialConfig, Uploader};
use console::style;
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::{Cli, CliError, get_baud, get_port};

/// Flash a hex-word firmware source to the device.
///
/// Without an explicit path, falls back to the source remembered by a
/// previous `flash --remember`.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    image: Option<&Path>,
    no_reset: bool,
    remember: bool,
    monitor_after: bool,
) -> Result<()> {
    let image: PathBuf = match image {
        Some(path) => path.to_path_buf(),
        None => config.upload.image.clone().ok_or_else(|| {
            CliError::Usage(
                "no firmware source specified (pass a path, or flash once with --remember)"
                    .to_string(),
            )
        })?,
    };

    let frame = FirmwareFrame::from_file(&image)
        .with_context(|| format!("Failed to read firmware source: {}", image.display()))?;

    debug!(
        "Parsed {} words ({} payload bytes), checksum {:#010x}",
        frame.word_count(),
        frame.size(),
        frame.checksum()
    );

    let port_name = get_port(cli, config)?;
    let baud = get_baud(cli, config);

    eprintln!(
        "{} Flashing {} ({}) to {} @ {} baud",
        style("→").cyan(),
        style(image.display()).green(),
        HumanBytes(frame.size() as u64),
        style(&port_name).green(),
        baud
    );

    let port = NativePort::open(&SerialConfig::new(&port_name, baud))
        .with_context(|| format!("Failed to open port {port_name}"))?;

    let bar = if cli.quiet || cli.non_interactive {
        ProgressBar::with_draw_target(Some(frame.size() as u64), ProgressDrawTarget::hidden())
    } else {
        let bar = ProgressBar::new(frame.size() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{bar:40.cyan/blue} {percent:>3}% {bytes}/{total_bytes} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    };

    let reset_before_upload = !(no_reset || config.upload.no_reset);
    if !reset_before_upload {
        info!("Skipping pre-upload reset pulse");
    }

    let mut uploader = Uploader::new(port);
    uploader.upload(&frame, reset_before_upload, |progress| {
        bar.set_position(progress.bytes_sent as u64);
        let mut msg = format!("{}/s", HumanBytes(progress.average_bps as u64));
        if let Some(bps) = progress.instant_bps {
            msg = format!("{}/s", HumanBytes(bps as u64));
        }
        if let Some(eta) = progress.eta {
            msg.push_str(&format!(" (eta {})", HumanDuration(eta)));
        }
        bar.set_message(msg);
    })?;
    bar.finish_and_clear();

    eprintln!(
        "{} Flashed {} bytes, checksum {:#010x}",
        style("✓").green(),
        frame.size(),
        frame.checksum()
    );

    if remember {
        config.upload.image = Some(image.clone());
        if let Err(e) = config.save_port(&port_name, baud) {
            warn!("Could not save connection settings: {e}");
        }
    }

    if monitor_after {
        // The port is held under an exclusive device lock until dropped;
        // the monitor opens it again itself.
        drop(uploader);
        return super::monitor::cmd_monitor(cli, config, 200, false, None);
    }

    Ok(())
}
