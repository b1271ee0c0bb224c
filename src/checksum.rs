//! Checksums used on the WG0X wire and in EEPROM records.
//!
//! Mailbox and process-data buffers carry a trailing byte produced by
//! [`compute_checksum`]. A buffer whose trailing byte was built with
//! [`trailing_checksum`] re-checksums to zero over its full length, which is
//! how every receiver verifies it.
//!
//! Configuration records use CRC-32 (the same polynomial and reflection as
//! boost `crc_32_type`) computed over explicit byte prefixes.

use crc::{Crc, CRC_32_ISO_HDLC};

const CHECKSUM_SEED: u8 = 0x42;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Rotates an 8-bit value right by one bit
pub fn rotate_right8(value: u8) -> u8 {
    value.rotate_right(1)
}

/// Seeded rotate/xor checksum over `data`
pub fn compute_checksum(data: &[u8]) -> u8 {
    data.iter()
        .fold(CHECKSUM_SEED, |sum, &byte| rotate_right8(sum) ^ byte)
}

/// Value to append after `data` so the whole buffer checksums to zero
pub fn trailing_checksum(data: &[u8]) -> u8 {
    rotate_right8(compute_checksum(data))
}

/// True when `data` (including its trailing checksum byte) verifies
pub fn verify_checksum(data: &[u8]) -> bool {
    compute_checksum(data) == 0
}

/// CRC-32 over `data[..len]`
pub fn crc32_prefix(data: &[u8], len: usize) -> u32 {
    CRC32.checksum(&data[..len.min(data.len())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_moves_low_bit_to_top() {
        assert_eq!(rotate_right8(0x01), 0x80);
        assert_eq!(rotate_right8(0x42), 0x21);
        assert_eq!(rotate_right8(0xFF), 0xFF);
    }

    #[test]
    fn empty_buffer_checksums_to_seed() {
        assert_eq!(compute_checksum(&[]), 0x42);
    }

    #[test]
    fn trailing_byte_makes_buffer_verify() {
        for payload in [&b""[..], &b"\x00"[..], &b"WG06 mailbox"[..], &[0xFFu8; 300][..]] {
            let mut buf = payload.to_vec();
            buf.push(trailing_checksum(payload));
            assert_eq!(compute_checksum(&buf), 0);
            assert!(verify_checksum(&buf));
        }
    }

    #[test]
    fn corrupted_byte_fails_verification() {
        let mut buf = vec![0x10, 0x20, 0x30];
        buf.push(trailing_checksum(&buf));
        buf[1] ^= 0x04;
        assert!(!verify_checksum(&buf));
    }

    #[test]
    fn crc32_matches_reference_value() {
        // Standard CRC-32 check value
        assert_eq!(crc32_prefix(b"123456789", 9), 0xCBF4_3926);
        assert_eq!(crc32_prefix(b"123456789xyz", 9), 0xCBF4_3926);
    }
}
