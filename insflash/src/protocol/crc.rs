//! CRC-16 used by both wire formats.
//!
//! The units use CRC-CCITT with polynomial 0x1021 and initial value 0x1D0F,
//! MSB first with no final XOR. This is the catalogued AUG-CCITT variant
//! (`CRC_16_SPI_FUJITSU`, check value 0xE5CC).

use crc::{CRC_16_SPI_FUJITSU, Crc};

const CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_SPI_FUJITSU);

/// Compute the frame CRC over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    CCITT.checksum(data)
}

/// Compute the CRC over several slices as if they were concatenated.
pub fn crc16_parts(parts: &[&[u8]]) -> u16 {
    let mut digest = CCITT.digest();
    for part in parts {
        digest.update(part);
    }
    digest.finalize()
}

/// CRC in wire order (most significant byte first).
pub fn crc16_bytes(data: &[u8]) -> [u8; 2] {
    crc16(data).to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(crc16(b"123456789"), 0xE5CC);
    }

    #[test]
    fn test_empty_is_init() {
        assert_eq!(crc16(&[]), 0x1D0F);
    }

    #[test]
    fn test_parts_match_whole() {
        let whole = crc16(b"pG\x00hello");
        assert_eq!(crc16_parts(&[b"pG", b"\x00", b"hello"]), whole);
    }

    #[test]
    fn test_bytes_are_msb_first() {
        let value = crc16(b"abc");
        let bytes = crc16_bytes(b"abc");
        assert_eq!((u16::from(bytes[0]) << 8) | u16::from(bytes[1]), value);
    }
}
