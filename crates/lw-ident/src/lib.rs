//! Process-local short identifier generation.
//!
//! Mirrors the key scheme used throughout the planner and library store: a
//! base-62 alphanumeric alphabet (`0-9A-Za-z`), generated either randomly
//! (for fresh node/channel identifiers) or deterministically from content
//! (for stable plan/step keys that must match across re-runs of the same
//! inputs).

#![deny(unsafe_code)]

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use sha2::{Digest, Sha256};

const ASCII_RANGES: [(u8, u8); 3] = [(48, 57), (65, 90), (97, 122)];

fn vocab() -> Vec<char> {
    ASCII_RANGES
        .iter()
        .flat_map(|&(a, b)| (a..=b).map(|c| c as char))
        .collect()
}

/// Generates short, base-62 identifiers — either randomly or derived from
/// the sha256 digest of arbitrary content.
///
/// Holds its own RNG state so that callers can seed it for reproducible
/// test runs, the way the teacher's own fixtures seed deterministic clocks.
pub struct KeyGenerator {
    vocab: Vec<char>,
    rng: StdRng,
}

impl KeyGenerator {
    /// Construct a generator seeded from the OS entropy source.
    pub fn new() -> Self {
        Self {
            vocab: vocab(),
            rng: StdRng::from_os_rng(),
        }
    }

    /// Construct a generator with a fixed seed, for reproducible tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            vocab: vocab(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate a random UID of length `len`, retrying until it is not in
    /// `blacklist`.
    pub fn generate_uid(&mut self, len: usize, blacklist: &std::collections::HashSet<String>) -> String {
        loop {
            let key: String = (0..len)
                .map(|_| self.vocab[self.rng.random_range(0..self.vocab.len())])
                .collect();
            if !blacklist.contains(&key) {
                return key;
            }
        }
    }

    /// Encode `i` as a base-62 string of exactly `len` digits, most
    /// significant first unless `little_endian` is set. Values too large to
    /// fit are truncated to the low-order `len` base-62 digits.
    pub fn from_int(i: u128, len: usize, little_endian: bool) -> String {
        let v = vocab();
        let mut chunks = vec![v[0]; len];
        let mut i = i;
        let mut place = 0;
        while i > 0 && place < len {
            let chunk_k = (i % v.len() as u128) as usize;
            i /= v.len() as u128;
            chunks[place] = v[chunk_k];
            place += 1;
        }
        if !little_endian {
            chunks.reverse();
        }
        chunks.into_iter().collect()
    }

    /// Derive a stable base-62 key from the sha256 digest of `s`. Two equal
    /// strings always yield the same key; this is how plan and step keys
    /// stay stable across re-runs of identical inputs.
    pub fn from_str(s: &str, len: usize) -> String {
        let digest = Sha256::digest(s.as_bytes());
        // Fold the 256-bit digest down to a u128 by XOR-ing the two halves;
        // from_int's modular reduction makes the high bits irrelevant
        // anyway, so this just keeps the intermediate value machine-sized.
        let (hi, lo) = digest.split_at(16);
        let hi = u128::from_be_bytes(hi.try_into().unwrap());
        let lo = u128::from_be_bytes(lo.try_into().unwrap());
        Self::from_int(hi ^ lo, len, false)
    }

    /// Parse `hex` as a hexadecimal integer and encode it as a base-62 key.
    pub fn from_hex(hex: &str, len: usize, little_endian: bool) -> Result<String, std::num::ParseIntError> {
        let i = u128::from_str_radix(hex.trim_start_matches("0x"), 16)?;
        Ok(Self::from_int(i, len, little_endian))
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn random_uid_is_right_length_and_alphabet() {
        let mut kg = KeyGenerator::seeded(42);
        let key = kg.generate_uid(12, &HashSet::new());
        assert_eq!(key.len(), 12);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn random_uid_avoids_blacklist() {
        let mut kg = KeyGenerator::seeded(7);
        let mut blacklist = HashSet::new();
        for _ in 0..50 {
            let key = kg.generate_uid(4, &blacklist);
            assert!(!blacklist.contains(&key));
            blacklist.insert(key);
        }
    }

    #[test]
    fn seeded_generators_are_deterministic() {
        let mut a = KeyGenerator::seeded(1234);
        let mut b = KeyGenerator::seeded(1234);
        let ka = a.generate_uid(8, &HashSet::new());
        let kb = b.generate_uid(8, &HashSet::new());
        assert_eq!(ka, kb);
    }

    #[test]
    fn from_str_is_deterministic() {
        let a = KeyGenerator::from_str("hello world", 8);
        let b = KeyGenerator::from_str("hello world", 8);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn from_str_differs_for_different_input() {
        let a = KeyGenerator::from_str("given-targets-steps-a", 6);
        let b = KeyGenerator::from_str("given-targets-steps-b", 6);
        assert_ne!(a, b);
    }

    #[test]
    fn from_int_round_trip_endianness() {
        let be = KeyGenerator::from_int(12345, 8, false);
        let le = KeyGenerator::from_int(12345, 8, true);
        let mut le_reversed: Vec<char> = le.chars().collect();
        le_reversed.reverse();
        assert_eq!(be, le_reversed.into_iter().collect::<String>());
    }

    #[test]
    fn from_hex_matches_from_int() {
        let via_hex = KeyGenerator::from_hex("3039", 8, false).unwrap();
        let via_int = KeyGenerator::from_int(0x3039, 8, false);
        assert_eq!(via_hex, via_int);
    }

    proptest::proptest! {
        #[test]
        fn from_str_always_right_length(s in ".*", len in 1usize..16) {
            let key = KeyGenerator::from_str(&s, len);
            prop_assert_eq!(key.len(), len);
        }
    }
}
