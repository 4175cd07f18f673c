//! CRC32 primitive (component A).
//!
//! IEEE-802.3 polynomial 0xEDB88320, init 0xFFFFFFFF, post-XOR 0xFFFFFFFF,
//! reflected (little-endian bit order). This is the integrity primitive
//! backing every persisted record in [`crate::persist`].

use std::sync::OnceLock;

const POLY: u32 = 0xEDB8_8320;

fn table() -> &'static [u32; 256] {
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        let mut i = 0usize;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ POLY
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    })
}

/// Computes the IEEE-802.3 CRC32 of `bytes`.
///
/// `crc32(b"123456789") == 0xCBF43926` (the standard check vector) and
/// `crc32(&[]) == 0`.
pub fn crc32(bytes: &[u8]) -> u32 {
    let table = table();
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in bytes {
        let idx = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ table[idx];
    }
    crc ^ 0xFFFF_FFFF
}

/// Returns `true` if `crc32(bytes) == expected`.
pub fn verify(bytes: &[u8], expected: u32) -> bool {
    crc32(bytes) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn single_bit_flip_changes_crc() {
        let base = b"smart-qso-flight-software".to_vec();
        let base_crc = crc32(&base);
        for bit in 0..8 {
            let mut flipped = base.clone();
            flipped[0] ^= 1 << bit;
            assert_ne!(crc32(&flipped), base_crc, "bit {bit} flip did not change CRC");
        }
    }

    #[test]
    fn verify_round_trip() {
        let data = b"telemetry-frame".to_vec();
        let crc = crc32(&data);
        assert!(verify(&data, crc));
        assert!(!verify(&data, crc.wrapping_add(1)));
    }
}
