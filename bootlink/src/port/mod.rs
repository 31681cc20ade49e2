//! Transport abstraction for the bootloader link.
//!
//! The protocol layer never talks to a serial device directly; it goes
//! through the [`Port`] trait, a byte-oriented duplex channel plus the two
//! out-of-band control lines the bootloader uses for reset pulses. That
//! keeps the upload sequencer and reassembler testable against in-memory
//! ports and agnostic to the underlying transport technology.
//!
//! ```text
//! +---------------------+
//! |  Upload / Monitor   |
//! +----------+----------+
//!            |
//! +----------v----------+
//! |      Port trait     |
//! +----------+----------+
//!            |
//! +----------v----------+
//! |     NativePort      |
//! |    (serialport)     |
//! +---------------------+
//! ```

pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial link configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Device path or name ("/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(50),
        }
    }
}

impl SerialConfig {
    /// Create a configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte-oriented duplex channel with two reset control lines.
///
/// Line A carries the level-triggered pre-upload reset pulse; line B
/// carries the short edge pulse for the manual "restart program" action.
/// On the native implementation they map to DTR and RTS respectively.
pub trait Port: Read + Write + Send {
    /// Change the read/write timeout on the open channel.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// The currently effective timeout.
    fn timeout(&self) -> Duration;

    /// Drop any bytes queued in the OS input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Name the port was opened with.
    fn name(&self) -> &str;

    /// Drive reset line A (true = asserted/low at the device).
    fn set_reset_a(&mut self, asserted: bool) -> Result<()>;

    /// Drive reset line B (true = asserted/low at the device).
    fn set_reset_b(&mut self, asserted: bool) -> Result<()>;

    /// Flush and shut the channel down; no further I/O afterwards.
    fn close(&mut self) -> Result<()>;

    /// Write the whole buffer and flush, blocking until done.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

pub use native::NativePort;
