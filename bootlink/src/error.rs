//! Error types for bootlink.

use std::io;
use thiserror::Error;

use crate::upload::Stage;

/// Result type for bootlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for bootlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A line in the firmware source is not a valid 32-bit hex word.
    #[error("line {line}: not a 32-bit hex word: {word:?}")]
    Parse {
        /// 1-based line number in the source file.
        line: usize,
        /// The offending line text (trimmed).
        word: String,
    },

    /// The firmware source contained no data lines.
    #[error("firmware source contains no data lines")]
    EmptyImage,

    /// The payload does not fit the frame's 32-bit size field.
    #[error("firmware payload is {size} bytes, which exceeds the 32-bit size field")]
    ImageTooLarge {
        /// Payload length in bytes.
        size: usize,
    },

    /// A transport write failed during an upload.
    ///
    /// Carries the stage that was in progress; nothing after the failed
    /// stage was transmitted.
    #[error("upload failed during {stage} stage: {source}")]
    Upload {
        /// Stage of the upload sequence that was in progress.
        stage: Stage,
        /// Underlying transport error.
        source: io::Error,
    },
}
