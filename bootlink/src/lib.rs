//! # bootlink
//!
//! Host-side driver for a serial-attached firmware bootloader.
//!
//! This crate provides the core functionality for pushing a firmware image
//! to a device over a byte-oriented serial link and for reconstructing the
//! device's log output from the same link:
//!
//! - Hex-word firmware source parsing and upload frame construction
//!   (magic + size + payload + checksum)
//! - The bootloader's reflected CRC-32 checksum variant
//! - Log stream reassembly with hybrid newline/severity-prefix/timeout
//!   splitting
//! - Staged, timed upload sequencing with progress and throughput
//!   reporting
//!
//! ## Example
//!
//! ```rust,no_run
//! use bootlink::{FirmwareFrame, NativePort, SerialConfig, Uploader};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let frame = FirmwareFrame::from_file("kernel.hex")?;
//!
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!     let mut uploader = Uploader::new(port);
//!
//!     uploader.upload(&frame, true, |progress| {
//!         println!("{}% ({} bytes)", progress.percent, progress.bytes_sent);
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod error;
pub mod image;
pub mod port;
pub mod reassembly;
pub mod upload;

// Re-exports for convenience
pub use {
    checksum::{Crc32, crc32},
    error::{Error, Result},
    image::{FRAME_MAGIC, FirmwareFrame},
    port::{NativePort, Port, SerialConfig},
    reassembly::{LogMessage, MessageSink, Reassembler, Severity},
    upload::{Progress, Stage, UploadConfig, Uploader},
};
