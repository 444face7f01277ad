//! FNV-1a hashing for state fingerprints and save checksums.

/// Incremental FNV-1a 64-bit hasher.
///
/// Used for desync checks between two runs of the same content and as the
/// save-snapshot checksum. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    /// Hashes the exact bit pattern, so `0.0` and `-0.0` differ.
    pub fn write_f64(&mut self, v: f64) {
        self.write(&v.to_bits().to_le_bytes());
    }

    /// Length-prefixed so adjacent strings cannot alias.
    pub fn write_str(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.write(s.as_bytes());
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write(&[v as u8]);
    }

    pub fn finish(self) -> u64 {
        self.0
    }

    /// One-shot hash of a byte slice.
    pub fn of(bytes: &[u8]) -> u64 {
        let mut h = Self::new();
        h.write(bytes);
        h.finish()
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

/// 16-digit lowercase hex rendering of an FNV-1a hash over `data`.
pub fn checksum_hex(data: &str) -> String {
    format!("{:016x}", StateHash::of(data.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(StateHash::of(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(StateHash::of(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn order_matters() {
        let mut h1 = StateHash::new();
        h1.write_u32(1);
        h1.write_u32(2);
        let mut h2 = StateHash::new();
        h2.write_u32(2);
        h2.write_u32(1);
        assert_ne!(h1.finish(), h2.finish());
    }

    #[test]
    fn strings_are_length_prefixed() {
        let mut h1 = StateHash::new();
        h1.write_str("ab");
        h1.write_str("c");
        let mut h2 = StateHash::new();
        h2.write_str("a");
        h2.write_str("bc");
        assert_ne!(h1.finish(), h2.finish());
    }

    #[test]
    fn checksum_is_sixteen_hex_digits() {
        let sum = checksum_hex("{\"resources\":{}}");
        assert_eq!(sum.len(), 16);
        assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(checksum_hex(""), "cbf29ce484222325");
    }
}
