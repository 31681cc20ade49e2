//! Native serial port implementation via the `serialport` crate.

use crate::error::{Error, Result};
use crate::port::{Port, SerialConfig};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Serial port transport for desktop platforms.
///
/// Opens 8N1 with no flow control; the bootloader link never negotiates
/// framing parameters.
pub struct NativePort {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    timeout: Duration,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()?;

        Ok(Self {
            port,
            name: config.port_name.clone(),
            timeout: config.timeout,
        })
    }

    /// Create a cloned reader handle for a background read loop.
    ///
    /// The clone shares the OS handle; reads on the clone and writes on
    /// the original do not interfere.
    pub fn try_clone_reader(&self) -> Result<Box<dyn serialport::SerialPort>> {
        Ok(self.port.try_clone()?)
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port.set_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_reset_a(&mut self, asserted: bool) -> Result<()> {
        self.port
            .write_data_terminal_ready(asserted)
            .map_err(Error::Serial)
    }

    fn set_reset_b(&mut self, asserted: bool) -> Result<()> {
        self.port
            .write_request_to_send(asserted)
            .map_err(Error::Serial)
    }

    fn close(&mut self) -> Result<()> {
        // The OS handle is released when the boxed port is dropped; all
        // that is left to do here is push out buffered bytes.
        self.port.flush()?;
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }
}
