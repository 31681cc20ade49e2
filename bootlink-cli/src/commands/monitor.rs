//! Serial log monitor command implementation.
//!
//! Reader thread feeds raw serial bytes into the reassembler; complete
//! messages come back through the sink and are printed with severity
//! colours. The main thread owns the keyboard.

use anyhow::{Context, Result};
use bootlink::{LogMessage, NativePort, Reassembler, SerialConfig, Severity, Uploader};
use console::style;
use std::io::{self, IsTerminal, Write as _};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use crate::config::Config;
use crate::{Cli, clear_interrupted_flag, get_baud, get_port, was_interrupted};

/// Run the serial log monitor.
///
/// - Reader thread: serial → reassembler → terminal
/// - Main thread: keyboard (crossterm raw mode)
/// - Ctrl+C: exit
/// - Ctrl+R: pulse the restart line
/// - Ctrl+T: toggle timestamp display
pub(crate) fn cmd_monitor(
    cli: &Cli,
    config: &Config,
    quiet_ms: u64,
    timestamp: bool,
    log_file: Option<&Path>,
) -> Result<()> {
    use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
    use crossterm::terminal;

    let port_name = get_port(cli, config)?;
    let baud = get_baud(cli, config);
    let tty_mode =
        !cli.non_interactive && io::stdout().is_terminal() && io::stderr().is_terminal();

    eprintln!(
        "{} Monitoring {} @ {} baud",
        style("📡").cyan(),
        style(&port_name).green(),
        baud
    );
    if tty_mode {
        eprintln!(
            "{}",
            style("Ctrl+C exit, Ctrl+R restart device, Ctrl+T toggle timestamps").dim()
        );
    }

    let port = NativePort::open(&SerialConfig::new(&port_name, baud))
        .with_context(|| format!("Failed to open port {port_name}"))?;
    let mut serial_reader = port
        .try_clone_reader()
        .context("Failed to clone port for reading")?;
    // The main thread keeps the port for the Ctrl+R restart pulse.
    let mut uploader = Uploader::new(port);

    let log_writer: Option<Arc<Mutex<std::fs::File>>> = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            eprintln!(
                "{} Logging to {}",
                style("📝").cyan(),
                style(path.display()).green()
            );
            Some(Arc::new(Mutex::new(file)))
        },
        None => None,
    };

    let show_timestamp = Arc::new(AtomicBool::new(timestamp));
    let show_timestamp_sink = show_timestamp.clone();
    let term_lock = Arc::new(Mutex::new(()));
    let term_lock_sink = term_lock.clone();
    let log_writer_sink = log_writer.clone();

    let sink = move |message: LogMessage| {
        if let Some(ref log) = log_writer_sink {
            if let Ok(mut f) = log.lock() {
                let _ = f.write_all(message.text.as_bytes());
            }
        }
        let rendered = render_message(&message, show_timestamp_sink.load(Ordering::Relaxed));
        if let Ok(_guard) = term_lock_sink.lock() {
            if tty_mode {
                // Raw mode needs explicit carriage returns
                print!("{}\r\n", rendered.trim_end_matches(['\r', '\n']));
            } else {
                print!("{rendered}");
                if !rendered.ends_with('\n') {
                    println!();
                }
            }
            io::stdout().flush().ok();
        }
    };

    let reassembler = Arc::new(Reassembler::with_quiet_interval(
        sink,
        Duration::from_millis(quiet_ms),
    ));

    let running = Arc::new(AtomicBool::new(true));
    let running_reader = running.clone();
    let reassembler_reader = reassembler.clone();
    let term_lock_reader = term_lock.clone();

    let reader_handle = std::thread::spawn(move || {
        if let Err(e) = pump_serial(&mut serial_reader, &running_reader, &reassembler_reader) {
            // Device gone: tell the user and stop the keyboard loop too.
            status_line(
                &term_lock_reader,
                &format!("{} Connection lost: {e}", style("⚠").yellow()),
                tty_mode,
            );
            running_reader.store(false, Ordering::Relaxed);
        }
        // Show whatever fragment is still pending before exit
        reassembler_reader.quiet_flush();
    });

    if tty_mode {
        terminal::enable_raw_mode().context("Failed to enable raw terminal mode")?;
    }
    let _raw_guard = RawModeGuard { active: tty_mode };

    while running.load(Ordering::Relaxed) {
        if was_interrupted() {
            break;
        }

        if !tty_mode {
            std::thread::sleep(Duration::from_millis(50));
            continue;
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(KeyEvent {
                code, modifiers, ..
            }) = event::read()?
            {
                match (code, modifiers) {
                    (KeyCode::Char('c'), KeyModifiers::CONTROL) => break,
                    (KeyCode::Char('r'), KeyModifiers::CONTROL) => {
                        status_line(
                            &term_lock,
                            &format!("{} Restarting device", style("🔄").cyan()),
                            tty_mode,
                        );
                        match uploader.pulse_restart() {
                            Ok(()) => status_line(
                                &term_lock,
                                &format!("{} Restart pulse sent", style("✓").green()),
                                tty_mode,
                            ),
                            Err(e) => status_line(
                                &term_lock,
                                &format!("{} Restart failed: {e}", style("⚠").yellow()),
                                tty_mode,
                            ),
                        }
                    },
                    (KeyCode::Char('t'), KeyModifiers::CONTROL) => {
                        let was_on = show_timestamp.fetch_xor(true, Ordering::Relaxed);
                        let state = if was_on { "off" } else { "on" };
                        status_line(
                            &term_lock,
                            &format!("{} Timestamps {state}", style("⏱").cyan()),
                            tty_mode,
                        );
                    },
                    _ => {},
                }
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    let _ = reader_handle.join();
    reassembler.clear();
    clear_interrupted_flag();

    status_line(
        &term_lock,
        &format!("{} Monitor closed", style("👋").cyan()),
        tty_mode,
    );
    Ok(())
}

/// Drain serial bytes into the reassembler until stopped or the transport
/// fails.
///
/// Read timeouts and interrupts keep polling; any other read error is
/// fatal and returned to the caller.
fn pump_serial<R: io::Read>(
    reader: &mut R,
    running: &AtomicBool,
    reassembler: &Reassembler,
) -> io::Result<()> {
    let mut buf = [0u8; 1024];
    while running.load(Ordering::Relaxed) {
        match reader.read(&mut buf) {
            Ok(0) => {},
            Ok(n) => reassembler.push_bytes(&buf[..n]),
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {},
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Print a status line on stderr without disturbing the monitor stream.
fn status_line(term_lock: &Arc<Mutex<()>>, message: &str, tty_mode: bool) {
    if let Ok(_guard) = term_lock.lock() {
        if tty_mode {
            eprint!("\r\x1b[2K{message}\r\n");
        } else {
            eprintln!("{message}");
        }
        io::stderr().flush().ok();
    }
}

/// Apply severity colour and the optional capture timestamp.
fn render_message(message: &LogMessage, with_timestamp: bool) -> String {
    let text = message.text.as_str();
    let coloured = match message.severity {
        Severity::Error => style(text).red().to_string(),
        Severity::Warn => style(text).yellow().to_string(),
        Severity::Info => style(text).green().to_string(),
        Severity::Debug => style(text).dim().to_string(),
        Severity::Default => text.to_string(),
    };
    if with_timestamp {
        format!("{} {coloured}", style(format_timestamp(message)).dim())
    } else {
        coloured
    }
}

/// Wall-clock capture time as `[HH:MM:SS.mmm]` (UTC).
fn format_timestamp(message: &LogMessage) -> String {
    let since_epoch = message
        .timestamp
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    let secs_of_day = since_epoch.as_secs() % 86_400;
    format!(
        "[{:02}:{:02}:{:02}.{:03}]",
        secs_of_day / 3600,
        (secs_of_day / 60) % 60,
        secs_of_day % 60,
        since_epoch.subsec_millis()
    )
}

/// Restores the terminal on drop, including on panic.
struct RawModeGuard {
    active: bool,
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn message(severity: Severity, text: &str) -> LogMessage {
        LogMessage {
            severity,
            text: text.to_string(),
            timestamp: UNIX_EPOCH + Duration::from_millis(45_296_789),
        }
    }

    #[test]
    fn test_format_timestamp_wraps_at_midnight() {
        let msg = message(Severity::Default, "x");
        // 45_296.789 s into the day is 12:34:56.789
        assert_eq!(format_timestamp(&msg), "[12:34:56.789]");
    }

    #[test]
    fn test_render_plain_message_unchanged() {
        let msg = message(Severity::Default, "plain text\n");
        assert_eq!(render_message(&msg, false), "plain text\n");
    }

    #[test]
    fn test_render_keeps_prefix_in_text() {
        let msg = message(Severity::Info, "[I]ready\n");
        let rendered = render_message(&msg, false);
        assert!(rendered.contains("[I]ready"));
    }

    #[test]
    fn test_render_with_timestamp_prepends_bracketed_time() {
        let msg = message(Severity::Default, "hello");
        let rendered = render_message(&msg, true);
        assert!(rendered.contains("[12:34:56.789]"));
        assert!(rendered.contains("hello"));
    }

    /// Yields its payload once, then fails the way an unplugged device does.
    struct DyingReader {
        payload: Vec<u8>,
    }

    impl io::Read for DyingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.payload.is_empty() {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            let n = self.payload.len().min(buf.len());
            buf[..n].copy_from_slice(&self.payload[..n]);
            self.payload.drain(..n);
            Ok(n)
        }
    }

    #[test]
    fn test_pump_serial_surfaces_fatal_error_after_draining() {
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = Mutex::new(tx);
        let sink = move |message: LogMessage| {
            tx.lock().unwrap().send(message).unwrap();
        };
        let reassembler = Reassembler::with_quiet_interval(sink, Duration::from_secs(60));

        let running = AtomicBool::new(true);
        let mut reader = DyingReader {
            payload: b"[E]gone\n".to_vec(),
        };

        let err = pump_serial(&mut reader, &running, &reassembler).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        // Bytes received before the failure were still delivered.
        let message = rx.try_recv().expect("message before the failure");
        assert_eq!(message.text, "[E]gone\n");
        assert_eq!(message.severity, Severity::Error);
    }

    #[test]
    fn test_pump_serial_returns_cleanly_once_stopped() {
        struct NoRead;
        impl io::Read for NoRead {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                panic!("read after stop");
            }
        }

        let sink = |_message: LogMessage| {};
        let reassembler = Reassembler::with_quiet_interval(sink, Duration::from_secs(60));
        let running = AtomicBool::new(false);
        pump_serial(&mut NoRead, &running, &reassembler).unwrap();
    }

    #[test]
    fn test_timestamp_for_recent_messages_is_fresh() {
        let msg = LogMessage {
            severity: Severity::Default,
            text: "x".to_string(),
            timestamp: SystemTime::now(),
        };
        // Sanity: formatting never panics for current time
        let _ = format_timestamp(&msg);
    }
}
