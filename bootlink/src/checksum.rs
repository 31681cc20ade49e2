//! CRC-32 variant used by the bootloader's upload frame.
//!
//! The device computes its checksum with a reflected (LSB-first) table
//! update, but the table itself is generated from the *unreflected*
//! polynomial `0x04C11DB7` fed through the right-shift recurrence. That
//! combination matches neither CRC-32/ISO-HDLC nor CRC-32/BZIP2, so a
//! generic CRC library cannot be substituted without checking its table
//! orientation against the vectors in the tests below.

/// Generator polynomial, applied in the right-shift table recurrence.
pub const POLYNOMIAL: u32 = 0x04C1_1DB7;

/// Lookup table, one entry per byte value.
static TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut entry = i as u32;
        let mut bit = 0;
        while bit < 8 {
            entry = if entry & 1 != 0 {
                (entry >> 1) ^ POLYNOMIAL
            } else {
                entry >> 1
            };
            bit += 1;
        }
        table[i] = entry;
        i += 1;
    }
    table
}

/// Incremental checksum state.
///
/// The register starts at `0xFFFFFFFF` and is complemented on
/// [`finish`](Self::finish).
#[derive(Debug, Clone)]
pub struct Crc32 {
    register: u32,
}

impl Crc32 {
    /// Create a fresh checksum state.
    pub fn new() -> Self {
        Self {
            register: 0xFFFF_FFFF,
        }
    }

    /// Feed bytes into the checksum.
    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            let index = (self.register ^ u32::from(byte)) & 0xFF;
            self.register = (self.register >> 8) ^ TABLE[index as usize];
        }
    }

    /// Complete the checksum, applying the final inversion.
    pub fn finish(self) -> u32 {
        !self.register
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum an ordered sequence of byte slices as one logical stream.
pub fn crc32(parts: &[&[u8]]) -> u32 {
    let mut crc = Crc32::new();
    for part in parts {
        crc.update(part);
    }
    crc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Expected values computed from an independent implementation of the
    // stated rules (right-shift table from 0x04C11DB7, init 0xFFFFFFFF,
    // final complement).

    #[test]
    fn test_size_plus_payload_vector() {
        let size = [0x04, 0x00, 0x00, 0x00];
        let payload = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(crc32(&[&size, &payload]), 0xF8A3_D221);
    }

    #[test]
    fn test_check_string_vector() {
        assert_eq!(crc32(&[b"123456789"]), 0xFC4F_2BE9);
    }

    #[test]
    fn test_single_zero_byte_vector() {
        assert_eq!(crc32(&[&[0x00]]), 0xFA60_FB57);
    }

    #[test]
    fn test_not_iso_hdlc() {
        // The canonical CRC-32/ISO-HDLC check value for "123456789" is
        // 0xCBF43926. This variant must not produce it.
        assert_ne!(crc32(&[b"123456789"]), 0xCBF4_3926);
    }

    #[test]
    fn test_split_invariance() {
        let whole = crc32(&[b"abcdef"]);
        let split = crc32(&[b"ab", b"cd", b"ef"]);
        assert_eq!(whole, split);

        let mut incremental = Crc32::new();
        incremental.update(b"abc");
        incremental.update(b"def");
        assert_eq!(incremental.finish(), whole);
    }

    #[test]
    fn test_table_entries() {
        assert_eq!(TABLE[0], 0);
        assert_eq!(TABLE[1], 0x0623_3697);
        assert_eq!(TABLE[255], 0x0560_FB57);
    }
}
