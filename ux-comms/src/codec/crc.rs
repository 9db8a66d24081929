//! Table-driven 16-bit CRC
//!
//! Two 8-bit registers updated per byte through a 256-entry table of hi/lo
//! pairs:
//!
//! ```text
//! idx = hi ^ byte
//! hi' = lo ^ TABLE[idx].hi
//! lo' = TABLE[idx].lo
//! crc = lo | (hi << 8)
//! ```
//!
//! The table is the reflected 0xA001 polynomial split into byte pairs and the
//! registers start at 0xFF, which makes the result bit-compatible with peers
//! using the classic hi/lo table implementation.

/// One table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcEntry {
    pub hi: u8,
    pub lo: u8,
}

const POLY: u16 = 0xA001;
const SEED: u8 = 0xFF;

/// Precomputed hi/lo table
pub static CRC_TABLE: [CrcEntry; 256] = build_table();

const fn build_table() -> [CrcEntry; 256] {
    let mut table = [CrcEntry { hi: 0, lo: 0 }; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = CrcEntry {
            hi: (crc & 0xFF) as u8,
            lo: (crc >> 8) as u8,
        };
        i += 1;
    }
    table
}

/// Incremental CRC state
#[derive(Debug, Clone, Copy)]
pub struct Crc16 {
    hi: u8,
    lo: u8,
}

impl Crc16 {
    pub fn new() -> Self {
        Self { hi: SEED, lo: SEED }
    }

    /// Feed bytes into the register pair
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let entry = CRC_TABLE[(self.hi ^ byte) as usize];
            self.hi = self.lo ^ entry.hi;
            self.lo = entry.lo;
        }
    }

    pub fn finish(&self) -> u16 {
        u16::from(self.lo) | (u16::from(self.hi) << 8)
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC of a byte slice
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(data);
    crc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_published_pairs() {
        let hi: Vec<u8> = CRC_TABLE[..8].iter().map(|e| e.hi).collect();
        let lo: Vec<u8> = CRC_TABLE[..8].iter().map(|e| e.lo).collect();
        assert_eq!(hi, [0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41]);
        assert_eq!(lo, [0x00, 0xC0, 0xC1, 0x01, 0xC3, 0x03, 0x02, 0xC2]);
        assert_eq!(CRC_TABLE[255], CrcEntry { hi: 0x40, lo: 0x40 });
    }

    #[test]
    fn test_check_value() {
        assert_eq!(crc16(b"123456789"), 0x374B);
    }

    #[test]
    fn test_empty_input_is_seed() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut crc = Crc16::new();
        crc.update(b"1234");
        crc.update(b"56789");
        assert_eq!(crc.finish(), crc16(b"123456789"));
    }

    #[test]
    fn test_deterministic_and_bit_sensitive() {
        let payload = b"the quick brown fox".to_vec();
        assert_eq!(crc16(&payload), crc16(&payload));

        let mut flipped = payload.clone();
        flipped[0] ^= 0x01;
        assert_ne!(crc16(&payload), crc16(&flipped));
    }
}
