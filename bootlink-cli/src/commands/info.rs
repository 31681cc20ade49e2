//! Info command implementation.
//!
//! Parses a firmware source and prints what would go over the wire,
//! without touching any serial port. JSON output goes to stdout only, so
//! the command composes with shell pipelines.

use anyhow::{Context, Result};
use bootlink::{FRAME_MAGIC, FirmwareFrame};
use console::style;
use serde::Serialize;
use std::path::Path;

use crate::Cli;

#[derive(Serialize)]
struct ImageInfo<'a> {
    source: &'a str,
    words: usize,
    payload_bytes: usize,
    frame_bytes: usize,
    magic: String,
    checksum: String,
}

/// Show information about a firmware source without flashing it.
pub(crate) fn cmd_info(cli: &Cli, image: &Path, json: bool) -> Result<()> {
    let frame = FirmwareFrame::from_file(image)
        .with_context(|| format!("Failed to read firmware source: {}", image.display()))?;

    let source = image.display().to_string();
    let info = ImageInfo {
        source: &source,
        words: frame.word_count(),
        payload_bytes: frame.size(),
        frame_bytes: frame.to_bytes().len(),
        magic: format!("{FRAME_MAGIC:#010x}"),
        checksum: format!("{:#010x}", frame.checksum()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    if !cli.quiet {
        eprintln!("{} {}", style("Firmware source:").bold(), source);
    }
    println!("words:         {}", info.words);
    println!("payload bytes: {}", info.payload_bytes);
    println!("frame bytes:   {}", info.frame_bytes);
    println!("magic:         {}", info.magic);
    println!("checksum:      {}", info.checksum);

    Ok(())
}
