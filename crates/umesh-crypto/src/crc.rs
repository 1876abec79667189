//! CRC16/CCITT and CRC32 integrity trailers (security modes 1 and 4).

use crc::{Crc, Algorithm};

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no xorout.
const CRC16_CCITT: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0xFFFF,
    refin: false,
    refout: false,
    xorout: 0x0000,
    check: 0x29B1,
    residue: 0x0000,
};

/// Compute the 2-byte big-endian CRC-16/CCITT trailer over `data`.
#[must_use]
pub fn crc16_ccitt(data: &[u8]) -> [u8; 2] {
    let crc = Crc::<u16>::new(&CRC16_CCITT);
    crc.checksum(data).to_be_bytes()
}

/// Compute the 4-byte big-endian CRC-32 (IEEE 802.3) trailer over `data`.
#[must_use]
pub fn crc32(data: &[u8]) -> [u8; 4] {
    let crc = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
    crc.checksum(data).to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_ccitt_known_vector() {
        // spec.md §8 scenario 2: control [0xff,0x7f] + payload 12 34 56 78 90 -> trailer 6d08
        let frame = [0xff, 0x7f, 0x12, 0x34, 0x56, 0x78, 0x90];
        assert_eq!(crc16_ccitt(&frame), [0x6d, 0x08]);
    }

    #[test]
    fn crc16_ccitt_detects_single_bit_flip() {
        let frame = [0xff, 0x7f, 0x12, 0x34, 0x56, 0x78, 0x90];
        let trailer = crc16_ccitt(&frame);
        for i in 0..frame.len() {
            let mut corrupted = frame;
            corrupted[i] ^= 0x01;
            assert_ne!(crc16_ccitt(&corrupted), trailer, "byte {i} flip undetected");
        }
    }

    #[test]
    fn crc32_detects_corruption() {
        let data = b"uMeshFw status broadcast";
        let trailer = crc32(data);
        let mut corrupted = *data;
        corrupted[3] ^= 0xFF;
        assert_ne!(crc32(&corrupted), trailer);
    }
}
