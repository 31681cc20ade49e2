//! Upload sequencing for the bootloader frame.
//!
//! The protocol is strictly sequential and fire-and-forget: magic, size,
//! payload chunks, checksum, each stage separated by a short settle delay
//! for the device's receiver. No acknowledgement is read back; a device
//! that rejects the frame says so, if at all, through its log output. A
//! failed write aborts the remaining sequence immediately and reports the
//! stage that was in progress.

use crate::error::{Error, Result};
use crate::image::FirmwareFrame;
use crate::port::Port;
use log::{debug, info};
use std::io;
use std::thread;
use std::time::{Duration, Instant};

/// Stage of the upload sequence, reported on failure and in progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Pre-upload reset pulse on line A.
    Reset,
    /// Magic marker write.
    Magic,
    /// Size field write.
    Size,
    /// Payload chunk writes.
    Payload,
    /// Checksum write.
    Checksum,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Reset => "reset",
            Self::Magic => "magic",
            Self::Size => "size",
            Self::Payload => "payload",
            Self::Checksum => "checksum",
        };
        f.write_str(name)
    }
}

/// Timing and chunking parameters for an upload.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Payload chunk size in bytes.
    pub chunk_size: usize,
    /// Delay after the magic and size writes.
    pub inter_frame_delay: Duration,
    /// How long reset line A is held asserted before an upload.
    pub reset_hold: Duration,
    /// Wait after releasing reset line A before the first write.
    pub reset_settle: Duration,
    /// Edge pulse width on reset line B for the manual restart action.
    pub restart_pulse: Duration,
    /// Minimum wall-time between instantaneous throughput samples.
    pub throughput_window: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            inter_frame_delay: Duration::from_millis(10),
            reset_hold: Duration::from_millis(100),
            reset_settle: Duration::from_millis(100),
            restart_pulse: Duration::from_millis(50),
            throughput_window: Duration::from_millis(250),
        }
    }
}

/// A progress report, issued after every payload chunk.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Payload completion in percent. Monotonically non-decreasing;
    /// reaches 100 only after the final payload chunk.
    pub percent: u8,
    /// Payload bytes written so far.
    pub bytes_sent: usize,
    /// Total payload bytes.
    pub total_bytes: usize,
    /// Bytes/s over the last sampling window, once one has elapsed.
    pub instant_bps: Option<f64>,
    /// Bytes/s averaged over the whole transfer so far.
    pub average_bps: f64,
    /// Estimated remaining time, from the running average.
    pub eta: Option<Duration>,
}

/// Drives one firmware frame across a transport.
pub struct Uploader<P: Port> {
    port: P,
    config: UploadConfig,
}

impl<P: Port> Uploader<P> {
    /// Create an uploader with default timing parameters.
    pub fn new(port: P) -> Self {
        Self::with_config(port, UploadConfig::default())
    }

    /// Create an uploader with explicit timing parameters.
    pub fn with_config(port: P, config: UploadConfig) -> Self {
        Self { port, config }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the uploader and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Transmit one frame, single attempt, no retries.
    ///
    /// `Ok` means every byte was handed to the transport — nothing more.
    /// The protocol defines no acknowledgement, so device-side rejection is
    /// only visible through the device's log stream. There is no
    /// cancellation: an in-progress upload stops only when the transport
    /// closes, which surfaces as a write failure at the next stage.
    pub fn upload<F>(
        &mut self,
        frame: &FirmwareFrame,
        reset_before_upload: bool,
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(&Progress),
    {
        info!(
            "Uploading {} payload bytes to {}",
            frame.size(),
            self.port.name()
        );

        if reset_before_upload {
            self.reset_pulse()?;
        }

        self.write_stage(Stage::Magic, &crate::image::FRAME_MAGIC_BYTES)?;
        thread::sleep(self.config.inter_frame_delay);

        self.write_stage(Stage::Size, &frame.size_bytes())?;
        thread::sleep(self.config.inter_frame_delay);

        self.write_payload(frame.payload(), &mut progress)?;

        self.write_stage(Stage::Checksum, &frame.checksum_bytes())?;

        info!("Upload complete ({} bytes)", frame.size());
        Ok(())
    }

    /// Level-triggered reset pulse on line A before an upload.
    fn reset_pulse(&mut self) -> Result<()> {
        debug!(
            "Reset pulse: hold {:?}, settle {:?}",
            self.config.reset_hold, self.config.reset_settle
        );
        self.port
            .set_reset_a(true)
            .map_err(tag_stage(Stage::Reset))?;
        thread::sleep(self.config.reset_hold);
        self.port
            .set_reset_a(false)
            .map_err(tag_stage(Stage::Reset))?;
        thread::sleep(self.config.reset_settle);
        Ok(())
    }

    /// Short edge pulse on line B: the manual "restart program" action.
    ///
    /// Not part of the upload sequence; no settle wait afterwards.
    pub fn pulse_restart(&mut self) -> Result<()> {
        debug!("Restart pulse: {:?}", self.config.restart_pulse);
        self.port.set_reset_b(true)?;
        thread::sleep(self.config.restart_pulse);
        self.port.set_reset_b(false)?;
        Ok(())
    }

    fn write_payload<F>(&mut self, payload: &[u8], progress: &mut F) -> Result<()>
    where
        F: FnMut(&Progress),
    {
        let total = payload.len();
        let started = Instant::now();
        let mut sent = 0usize;
        let mut window_start = started;
        let mut window_base = 0usize;
        let mut instant_bps = None;

        for chunk in payload.chunks(self.config.chunk_size) {
            self.write_stage(Stage::Payload, chunk)?;
            sent += chunk.len();

            let window = window_start.elapsed();
            if window >= self.config.throughput_window {
                #[allow(clippy::cast_precision_loss)]
                {
                    instant_bps = Some((sent - window_base) as f64 / window.as_secs_f64());
                }
                window_start = Instant::now();
                window_base = sent;
            }

            progress(&sample_progress(sent, total, started, instant_bps));
        }

        Ok(())
    }

    fn write_stage(&mut self, stage: Stage, bytes: &[u8]) -> Result<()> {
        debug!("Writing {stage} stage: {} bytes", bytes.len());
        self.port
            .write_all_bytes(bytes)
            .map_err(tag_stage(stage))
    }
}

/// Attribute a transport failure to the upload stage it interrupted.
fn tag_stage(stage: Stage) -> impl FnOnce(Error) -> Error {
    move |err| match err {
        Error::Io(source) => Error::Upload { stage, source },
        Error::Serial(source) => Error::Upload {
            stage,
            source: io::Error::other(source),
        },
        other => other,
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn sample_progress(
    sent: usize,
    total: usize,
    started: Instant,
    instant_bps: Option<f64>,
) -> Progress {
    let elapsed = started.elapsed().as_secs_f64();
    let average_bps = if elapsed > 0.0 {
        sent as f64 / elapsed
    } else {
        0.0
    };
    let eta = if average_bps > 0.0 && sent < total {
        Some(Duration::from_secs_f64((total - sent) as f64 / average_bps))
    } else {
        None
    };

    Progress {
        percent: (sent * 100 / total.max(1)) as u8,
        bytes_sent: sent,
        total_bytes: total,
        instant_bps,
        average_bps,
        eta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::FirmwareFrame;
    use std::io::{Read, Write};

    /// What the mock port saw, one entry per call.
    #[derive(Debug, PartialEq, Eq)]
    enum Op {
        Write(Vec<u8>),
        ResetA(bool),
        ResetB(bool),
    }

    #[derive(Default)]
    struct MockPort {
        ops: Vec<Op>,
        fail_after_writes: Option<usize>,
        writes: usize,
    }

    impl MockPort {
        fn failing_after(writes: usize) -> Self {
            Self {
                fail_after_writes: Some(writes),
                ..Self::default()
            }
        }

        fn written(&self) -> Vec<&[u8]> {
            self.ops
                .iter()
                .filter_map(|op| match op {
                    Op::Write(bytes) => Some(bytes.as_slice()),
                    _ => None,
                })
                .collect()
        }
    }

    impl Read for MockPort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::TimedOut.into())
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.fail_after_writes == Some(self.writes) {
                return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
            }
            self.writes += 1;
            self.ops.push(Op::Write(buf.to_vec()));
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for MockPort {
        fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        fn timeout(&self) -> Duration {
            Duration::ZERO
        }

        fn clear_buffers(&mut self) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn set_reset_a(&mut self, asserted: bool) -> Result<()> {
            self.ops.push(Op::ResetA(asserted));
            Ok(())
        }

        fn set_reset_b(&mut self, asserted: bool) -> Result<()> {
            self.ops.push(Op::ResetB(asserted));
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn fast_config() -> UploadConfig {
        UploadConfig {
            inter_frame_delay: Duration::ZERO,
            reset_hold: Duration::ZERO,
            reset_settle: Duration::ZERO,
            restart_pulse: Duration::ZERO,
            ..UploadConfig::default()
        }
    }

    /// Frame with a payload of `words` predictable 32-bit words.
    fn frame_of_words(words: usize) -> FirmwareFrame {
        let source: String = (0..words).map(|i| format!("{i:08X}\n")).collect();
        FirmwareFrame::from_reader(std::io::Cursor::new(source)).unwrap()
    }

    #[test]
    fn test_upload_write_sequence_and_chunking() {
        // 625 words = 2500 payload bytes -> chunks of 1024, 1024, 452.
        let frame = frame_of_words(625);
        assert_eq!(frame.size(), 2500);

        let mut uploader = Uploader::with_config(MockPort::default(), fast_config());
        uploader.upload(&frame, false, |_| {}).unwrap();

        let writes = uploader.port().written();
        assert_eq!(writes.len(), 6);
        assert_eq!(writes[0], crate::image::FRAME_MAGIC_BYTES);
        assert_eq!(writes[1], frame.size_bytes());
        assert_eq!(writes[2].len(), 1024);
        assert_eq!(writes[3].len(), 1024);
        assert_eq!(writes[4].len(), 452);
        assert_eq!(writes[5], frame.checksum_bytes());

        // Chunks concatenate back to the payload, in order.
        let mut rebuilt = Vec::new();
        for chunk in &writes[2..5] {
            rebuilt.extend_from_slice(chunk);
        }
        assert_eq!(rebuilt, frame.payload());
    }

    #[test]
    fn test_progress_monotone_and_complete_only_at_end() {
        let frame = frame_of_words(625);
        let mut uploader = Uploader::with_config(MockPort::default(), fast_config());

        let mut reports: Vec<Progress> = Vec::new();
        uploader
            .upload(&frame, false, |p| reports.push(p.clone()))
            .unwrap();

        assert_eq!(reports.len(), 3);
        let percents: Vec<u8> = reports.iter().map(|p| p.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert!(percents[..percents.len() - 1].iter().all(|&p| p < 100));
        assert_eq!(*percents.last().unwrap(), 100);
        assert_eq!(reports.last().unwrap().bytes_sent, 2500);
        assert_eq!(reports.last().unwrap().total_bytes, 2500);
    }

    #[test]
    fn test_reset_pulse_precedes_writes() {
        let frame = frame_of_words(1);
        let mut uploader = Uploader::with_config(MockPort::default(), fast_config());
        uploader.upload(&frame, true, |_| {}).unwrap();

        let ops = &uploader.port().ops;
        assert_eq!(ops[0], Op::ResetA(true));
        assert_eq!(ops[1], Op::ResetA(false));
        assert!(matches!(ops[2], Op::Write(_)));
    }

    #[test]
    fn test_no_reset_when_not_requested() {
        let frame = frame_of_words(1);
        let mut uploader = Uploader::with_config(MockPort::default(), fast_config());
        uploader.upload(&frame, false, |_| {}).unwrap();

        assert!(
            uploader
                .port()
                .ops
                .iter()
                .all(|op| !matches!(op, Op::ResetA(_)))
        );
    }

    #[test]
    fn test_restart_pulse_uses_line_b_only() {
        let mut uploader = Uploader::with_config(MockPort::default(), fast_config());
        uploader.pulse_restart().unwrap();

        assert_eq!(
            uploader.port().ops,
            vec![Op::ResetB(true), Op::ResetB(false)]
        );
    }

    #[test]
    fn test_failure_reports_stage_and_aborts() {
        let frame = frame_of_words(625);

        // First write (magic) fails.
        let mut uploader = Uploader::with_config(MockPort::failing_after(0), fast_config());
        let err = uploader.upload(&frame, false, |_| {}).unwrap_err();
        assert!(matches!(
            err,
            Error::Upload {
                stage: Stage::Magic,
                ..
            }
        ));
        assert!(uploader.port().written().is_empty());

        // Third write (first payload chunk) fails; nothing after it goes out.
        let mut uploader = Uploader::with_config(MockPort::failing_after(2), fast_config());
        let err = uploader.upload(&frame, false, |_| {}).unwrap_err();
        assert!(matches!(
            err,
            Error::Upload {
                stage: Stage::Payload,
                ..
            }
        ));
        assert_eq!(uploader.port().written().len(), 2);
    }

    #[test]
    fn test_short_payload_is_single_chunk() {
        let frame = frame_of_words(2);
        let mut uploader = Uploader::with_config(MockPort::default(), fast_config());

        let mut reports = Vec::new();
        uploader
            .upload(&frame, false, |p| reports.push(p.percent))
            .unwrap();

        assert_eq!(uploader.port().written().len(), 4);
        assert_eq!(reports, vec![100]);
    }

    #[test]
    fn test_stage_display_names() {
        assert_eq!(Stage::Reset.to_string(), "reset");
        assert_eq!(Stage::Payload.to_string(), "payload");
        assert_eq!(Stage::Checksum.to_string(), "checksum");
    }
}
