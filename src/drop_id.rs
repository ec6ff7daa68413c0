//! Unguessable drop identifiers.
//!
//! An id is 128 bits from the operating system CSPRNG rendered as exactly
//! [`DROP_ID_LEN`] base62 characters. Encoding always left-pads to the full
//! width, so every id has the same length and the same guess probability.

use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::DropError;

const BASE62_ALPHABET: &[u8; 62] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// 62^22 > 2^128 > 62^21
pub const DROP_ID_LEN: usize = 22;

const _: () = assert!(BASE62_ALPHABET.len() == 62);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DropId(String);

impl DropId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(encode_base62(u128::from_be_bytes(bytes)))
    }

    /// Validate untrusted input without touching the store.
    pub fn parse(value: &str) -> Result<Self, DropError> {
        let trimmed = value.trim();
        if !is_well_formed(trimmed) {
            return Err(DropError::validation("Invalid drop ID"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DropId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn is_well_formed(value: &str) -> bool {
    value.len() == DROP_ID_LEN && value.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn encode_base62(mut value: u128) -> String {
    let mut digits = [b'0'; DROP_ID_LEN];
    for slot in digits.iter_mut().rev() {
        *slot = BASE62_ALPHABET[(value % 62) as usize];
        value /= 62;
    }
    debug_assert_eq!(value, 0, "128-bit value must fit in {DROP_ID_LEN} digits");
    digits.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn encoding_pads_to_fixed_width() {
        assert_eq!(encode_base62(0), "0".repeat(DROP_ID_LEN));
        assert_eq!(encode_base62(61), format!("{}z", "0".repeat(DROP_ID_LEN - 1)));
        assert_eq!(encode_base62(62), format!("{}10", "0".repeat(DROP_ID_LEN - 2)));
        assert_eq!(encode_base62(u128::MAX).len(), DROP_ID_LEN);
    }

    #[test]
    fn max_value_encodes_known_digits() {
        // 2^128 - 1 in base62
        assert_eq!(encode_base62(u128::MAX), "7n42DGM5Tflk9n8mt7Fhc7");
    }

    #[test]
    fn generated_ids_are_well_formed() {
        for _ in 0..1_000 {
            let id = DropId::generate();
            assert!(is_well_formed(id.as_str()), "{id} should be well formed");
        }
    }

    #[test]
    fn generated_ids_do_not_collide() {
        let total = 1_000_000;
        let mut seen = HashSet::with_capacity(total);
        for _ in 0..total {
            assert!(seen.insert(DropId::generate()), "duplicate id generated");
        }
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed(&"a".repeat(DROP_ID_LEN - 1)));
        assert!(!is_well_formed(&"a".repeat(DROP_ID_LEN + 1)));
        assert!(!is_well_formed(&format!("{}-", "a".repeat(DROP_ID_LEN - 1))));
        assert!(!is_well_formed(&format!("{}é", "a".repeat(DROP_ID_LEN - 2))));
        assert!(is_well_formed(&"a".repeat(DROP_ID_LEN)));
    }

    #[test]
    fn parse_trims_and_validates() {
        let raw = format!("  {}  ", "Ab1".repeat(7) + "x");
        let id = DropId::parse(&raw).expect("valid id");
        assert_eq!(id.as_str().len(), DROP_ID_LEN);
        assert!(matches!(
            DropId::parse("../../etc/passwd"),
            Err(DropError::Validation(_))
        ));
    }
}
