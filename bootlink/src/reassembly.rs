//! Log stream reassembly.
//!
//! The device's log output arrives as raw byte chunks with arbitrary
//! boundaries and no reliable framing: a line may span several chunks, a
//! chunk may hold several lines, and the firmware sometimes starts a new
//! prioritized line (`[E]...`) before terminating the one it was printing.
//! Pure newline splitting would merge an interrupted line with its
//! interrupter into one garbled message; pure timeout splitting is too slow
//! for an interactive terminal.
//!
//! The [`Reassembler`] applies a hybrid policy to its pending buffer:
//!
//! 1. A recognized severity prefix (`[D]`, `[I]`, `[W]`, `[E]`) found at
//!    offset ≥ 1 *interrupts*: everything before it is emitted as its own
//!    message, even without a newline.
//! 2. Otherwise a newline terminates a message (the newline is kept).
//! 3. Otherwise the fragment is held, and a single-shot quiet timer
//!    force-emits it if no further bytes arrive within the quiet interval.
//!
//! Appends and timer expiries may race; both take the same lock around the
//! pending buffer, and messages are handed to the sink outside the lock.

use log::trace;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

/// Default quiet interval before an unterminated fragment is force-emitted.
pub const DEFAULT_QUIET_INTERVAL: Duration = Duration::from_millis(200);

/// The recognized severity prefixes, in device wire form.
pub const SEVERITY_PREFIXES: [&str; 4] = ["[D]", "[I]", "[W]", "[E]"];

/// Message severity, derived from the prefix at the start of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// No recognized prefix.
    Default,
    /// `[D]` prefix.
    Debug,
    /// `[I]` prefix.
    Info,
    /// `[W]` prefix.
    Warn,
    /// `[E]` prefix.
    Error,
}

/// One complete, classified log message.
#[derive(Debug, Clone)]
pub struct LogMessage {
    /// Severity derived from the leading prefix, if any.
    pub severity: Severity,
    /// Message text as received, prefix and trailing newline included.
    pub text: String,
    /// Capture time (when the message was split out of the stream).
    pub timestamp: SystemTime,
}

impl LogMessage {
    fn capture(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes).into_owned();
        Self {
            severity: classify(&text),
            text,
            timestamp: SystemTime::now(),
        }
    }
}

/// Derive the severity from a recognized prefix at the start of the text.
pub fn classify(text: &str) -> Severity {
    match text.as_bytes() {
        [b'[', b'D', b']', ..] => Severity::Debug,
        [b'[', b'I', b']', ..] => Severity::Info,
        [b'[', b'W', b']', ..] => Severity::Warn,
        [b'[', b'E', b']', ..] => Severity::Error,
        _ => Severity::Default,
    }
}

/// Destination for reassembled messages.
///
/// Implemented for any `Fn(LogMessage)` closure that is `Send + Sync`.
pub trait MessageSink: Send + Sync {
    /// Deliver one complete message.
    fn on_message(&self, message: LogMessage);
}

impl<F> MessageSink for F
where
    F: Fn(LogMessage) + Send + Sync,
{
    fn on_message(&self, message: LogMessage) {
        self(message);
    }
}

struct State {
    pending: Vec<u8>,
    deadline: Option<Instant>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
    sink: Box<dyn MessageSink>,
    quiet_interval: Duration,
}

impl Shared {
    fn emit_all(&self, messages: Vec<LogMessage>) {
        for message in messages {
            self.sink.on_message(message);
        }
    }
}

/// Reassembles discrete log messages from a chunked byte stream.
///
/// One instance per connection; owns its pending buffer and quiet timer,
/// so independent connections get independent reassemblers.
pub struct Reassembler {
    shared: Arc<Shared>,
    timer: Option<JoinHandle<()>>,
}

impl Reassembler {
    /// Create a reassembler delivering to `sink`, with the default quiet
    /// interval.
    pub fn new<S: MessageSink + 'static>(sink: S) -> Self {
        Self::with_quiet_interval(sink, DEFAULT_QUIET_INTERVAL)
    }

    /// Create a reassembler with an explicit quiet interval.
    pub fn with_quiet_interval<S: MessageSink + 'static>(sink: S, quiet_interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                pending: Vec::new(),
                deadline: None,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            sink: Box::new(sink),
            quiet_interval,
        });

        let timer_shared = Arc::clone(&shared);
        let timer = std::thread::spawn(move || run_timer(&timer_shared));

        Self {
            shared,
            timer: Some(timer),
        }
    }

    /// Feed a chunk of inbound bytes (the transport's data callback).
    ///
    /// Splits out and delivers every complete message; a trailing fragment
    /// stays buffered with the quiet timer (re)armed.
    pub fn push_bytes(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }

        let emitted;
        {
            #[allow(clippy::unwrap_used)] // lock poisoning is unrecoverable here
            let mut state = self.shared.state.lock().unwrap();
            state.pending.extend_from_slice(chunk);
            emitted = split_pending(&mut state.pending);
            state.deadline = if state.pending.is_empty() {
                None
            } else {
                Some(Instant::now() + self.shared.quiet_interval)
            };
            self.shared.wakeup.notify_one();
        }

        trace!("push_bytes: {} bytes, {} messages", chunk.len(), emitted.len());
        self.shared.emit_all(emitted);
    }

    /// Force-emit the buffered fragment, if any (the quiet-timeout callback).
    ///
    /// The internal timer calls this when the quiet interval elapses with no
    /// new bytes; it is public so callers can flush on their own schedule.
    pub fn quiet_flush(&self) {
        let flushed;
        {
            #[allow(clippy::unwrap_used)]
            let mut state = self.shared.state.lock().unwrap();
            state.deadline = None;
            flushed = flush_all(&mut state.pending);
        }

        self.shared.emit_all(flushed);
    }

    /// Discard the buffered fragment and cancel the timer (disconnect).
    pub fn clear(&self) {
        #[allow(clippy::unwrap_used)]
        let mut state = self.shared.state.lock().unwrap();
        state.pending.clear();
        state.deadline = None;
    }
}

impl Drop for Reassembler {
    fn drop(&mut self) {
        {
            #[allow(clippy::unwrap_used)]
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            self.shared.wakeup.notify_one();
        }
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}

/// Timer thread: sleeps on the armed deadline and flushes when it expires.
///
/// The deadline in `State` is the single source of truth; re-arming just
/// moves it, so at most one deadline is ever outstanding.
fn run_timer(shared: &Shared) {
    #[allow(clippy::unwrap_used)]
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.shutdown {
            break;
        }
        match state.deadline {
            None => {
                #[allow(clippy::unwrap_used)]
                {
                    state = shared.wakeup.wait(state).unwrap();
                }
            },
            Some(deadline) => {
                let now = Instant::now();
                if now < deadline {
                    #[allow(clippy::unwrap_used)]
                    {
                        state = shared.wakeup.wait_timeout(state, deadline - now).unwrap().0;
                    }
                    continue;
                }

                state.deadline = None;
                let flushed = flush_all(&mut state.pending);
                if !flushed.is_empty() {
                    trace!("quiet timeout: flushing fragment");
                    drop(state);
                    shared.emit_all(flushed);
                    #[allow(clippy::unwrap_used)]
                    {
                        state = shared.state.lock().unwrap();
                    }
                }
            },
        }
    }
}

/// Split every complete message out of `pending`, leaving the trailing
/// fragment (if any) in place.
fn split_pending(pending: &mut Vec<u8>) -> Vec<LogMessage> {
    let mut messages = Vec::new();

    while !pending.is_empty() {
        let newline = pending.iter().position(|&b| b == b'\n');
        let interrupt = find_interrupting_prefix(pending);

        let split_end = match (interrupt, newline) {
            // A new message began before the current one was terminated:
            // emit what came before the prefix, keep the prefix as the
            // start of the next message.
            (Some(pfx), None) => pfx,
            (Some(pfx), Some(nl)) if pfx < nl => pfx,
            // Ordinary terminated line, newline included.
            (_, Some(nl)) => nl + 1,
            // Incomplete fragment: stop and let the quiet timer handle it.
            (None, None) => break,
        };

        messages.push(LogMessage::capture(&pending[..split_end]));
        pending.drain(..split_end);
    }

    messages
}

/// Emit the whole buffer as one message and clear it.
fn flush_all(pending: &mut Vec<u8>) -> Vec<LogMessage> {
    if pending.is_empty() {
        return Vec::new();
    }
    let message = LogMessage::capture(pending);
    pending.clear();
    vec![message]
}

/// Find the first recognized severity prefix at offset ≥ 1.
///
/// Offset 0 is deliberately excluded: a prefix at the very start belongs to
/// the message currently being assembled, and splitting there would produce
/// an empty message.
fn find_interrupting_prefix(pending: &[u8]) -> Option<usize> {
    pending
        .windows(3)
        .enumerate()
        .skip(1)
        .find(|(_, w)| matches!(w, [b'[', b'D' | b'I' | b'W' | b'E', b']']))
        .map(|(i, _)| i)
}
