//! Firmware image source parsing and upload frame construction.
//!
//! The firmware source is a line-oriented text format: one 32-bit
//! hexadecimal word per non-blank line (not Intel-HEX). Each word is
//! appended to the payload in little-endian byte order.
//!
//! ## Frame layout
//!
//! ```text
//! +------------+--------+-----------------+----------+
//! |   Magic    |  Size  |     Payload     | Checksum |
//! +------------+--------+-----------------+----------+
//! |  4 bytes   | 4 bytes|   size bytes    | 4 bytes  |
//! +------------+--------+-----------------+----------+
//! | 0xDEADBEEF |  LE    | LE words        |   LE     |
//! |  (BE)      |        | concatenated    |          |
//! +------------+--------+-----------------+----------+
//! ```
//!
//! The checksum covers `size ++ payload`; the magic is excluded.

use crate::checksum::crc32;
use crate::error::{Error, Result};
use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Frame magic number, transmitted most-significant-byte-first.
pub const FRAME_MAGIC: u32 = 0xDEADBEEF;

/// The magic as it appears on the wire.
pub const FRAME_MAGIC_BYTES: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// Fixed frame overhead: magic(4) + size(4) + checksum(4).
pub const FRAME_OVERHEAD: usize = 12;

/// An immutable upload frame built from a firmware source.
///
/// Built once per upload attempt and consumed by the upload sequencer.
#[derive(Debug, Clone)]
pub struct FirmwareFrame {
    payload: Vec<u8>,
    checksum: u32,
}

impl FirmwareFrame {
    /// Build a frame from a firmware source file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading firmware source from: {}", path.display());

        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Build a frame by parsing hex words from a reader.
    ///
    /// Blank lines (after trimming) are skipped. Any other line must be a
    /// hexadecimal 32-bit word; a leading `0x` is tolerated.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut payload = Vec::new();
        let mut words = 0usize;

        for (index, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let word = parse_hex_word(trimmed).ok_or_else(|| Error::Parse {
                line: index + 1,
                word: trimmed.to_string(),
            })?;

            #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
            payload.write_u32::<LittleEndian>(word).unwrap();
            words += 1;
        }

        if payload.is_empty() {
            return Err(Error::EmptyImage);
        }

        let frame = Self::from_payload(payload)?;
        debug!(
            "Built frame: {} words, {} payload bytes, checksum {:#010X}",
            words,
            frame.payload.len(),
            frame.checksum
        );
        Ok(frame)
    }

    /// Wrap an already-assembled payload in a frame.
    fn from_payload(payload: Vec<u8>) -> Result<Self> {
        let size = frame_size_bytes(payload.len())?;
        let checksum = crc32(&[&size, &payload]);
        Ok(Self { payload, checksum })
    }

    /// Payload bytes (little-endian words concatenated from source lines).
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Number of 32-bit words in the payload.
    pub fn word_count(&self) -> usize {
        self.payload.len() / 4
    }

    /// The size field as transmitted (little-endian).
    pub fn size_bytes(&self) -> [u8; 4] {
        // Length was validated against the size field at construction.
        #[allow(clippy::cast_possible_truncation)]
        (self.payload.len() as u32).to_le_bytes()
    }

    /// Checksum over `size ++ payload`.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// The checksum field as transmitted (little-endian).
    pub fn checksum_bytes(&self) -> [u8; 4] {
        self.checksum.to_le_bytes()
    }

    /// Serialize the complete wire frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_OVERHEAD + self.payload.len());
        #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
        {
            buf.write_u32::<BigEndian>(FRAME_MAGIC).unwrap();
            buf.extend_from_slice(&self.size_bytes());
            buf.extend_from_slice(&self.payload);
            buf.write_u32::<LittleEndian>(self.checksum).unwrap();
        }
        buf
    }
}

/// Encode a payload length as the frame's size field, rejecting lengths
/// that do not fit its 32 bits.
fn frame_size_bytes(len: usize) -> Result<[u8; 4]> {
    match u32::try_from(len) {
        Ok(size) => Ok(size.to_le_bytes()),
        Err(_) => Err(Error::ImageTooLarge { size: len }),
    }
}

/// Parse one source line as a 32-bit hex word.
fn parse_hex_word(s: &str) -> Option<u32> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write as _;

    fn frame_from(source: &str) -> Result<FirmwareFrame> {
        FirmwareFrame::from_reader(Cursor::new(source))
    }

    #[test]
    fn test_words_become_little_endian_payload() {
        let frame = frame_from("01020304\n05060708\n").unwrap();
        assert_eq!(
            frame.payload(),
            &[0x04, 0x03, 0x02, 0x01, 0x08, 0x07, 0x06, 0x05]
        );
        assert_eq!(frame.size(), 8);
        assert_eq!(frame.word_count(), 2);
        assert_eq!(frame.size_bytes(), [0x08, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_wire_frame_layout() {
        let frame = frame_from("01020304\n05060708\n").unwrap();
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), FRAME_OVERHEAD + 8);
        assert_eq!(&bytes[0..4], &FRAME_MAGIC_BYTES);
        assert_eq!(&bytes[4..8], &[0x08, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[8..16], frame.payload());
        assert_eq!(&bytes[16..20], &frame.checksum().to_le_bytes());
    }

    #[test]
    fn test_checksum_covers_size_and_payload_only() {
        let frame = frame_from("01020304\n05060708\n").unwrap();
        // Independently computed for [08,00,00,00] ++ [04,03,02,01,08,07,06,05].
        assert_eq!(frame.checksum(), 0xFE7B_465B);
    }

    #[test]
    fn test_blank_lines_and_whitespace_skipped() {
        let frame = frame_from("\n  01020304  \n\n\t\n05060708\n").unwrap();
        assert_eq!(frame.word_count(), 2);
    }

    #[test]
    fn test_hex_prefix_tolerated() {
        let frame = frame_from("0xDEADBEEF\n").unwrap();
        assert_eq!(frame.payload(), &[0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let err = frame_from("01020304\nnot-hex\n").unwrap_err();
        match err {
            Error::Parse { line, word } => {
                assert_eq!(line, 2);
                assert_eq!(word, "not-hex");
            },
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_word_too_wide_is_parse_error() {
        let err = frame_from("1DEADBEEF\n").unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_payload_beyond_size_field_is_rejected() {
        assert_eq!(frame_size_bytes(8).unwrap(), [0x08, 0x00, 0x00, 0x00]);
        assert_eq!(
            frame_size_bytes(u32::MAX as usize).unwrap(),
            [0xFF, 0xFF, 0xFF, 0xFF]
        );

        let err = frame_size_bytes(u32::MAX as usize + 1).unwrap_err();
        assert!(matches!(
            err,
            Error::ImageTooLarge {
                size
            } if size == u32::MAX as usize + 1
        ));
    }

    #[test]
    fn test_empty_source_is_empty_image() {
        assert!(matches!(frame_from(""), Err(Error::EmptyImage)));
        assert!(matches!(frame_from("\n  \n\n"), Err(Error::EmptyImage)));
    }

    #[test]
    fn test_from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "00000001").unwrap();
        writeln!(file, "FFFFFFFF").unwrap();
        file.flush().unwrap();

        let frame = FirmwareFrame::from_file(file.path()).unwrap();
        assert_eq!(
            frame.payload(),
            &[0x01, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        let err = FirmwareFrame::from_file("/nonexistent/image.hex").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
