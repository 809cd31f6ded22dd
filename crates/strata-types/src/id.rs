use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Length of a [`BinaryId`] in bytes.
pub const BIN_LEN: usize = 11;
/// Length of a [`BinaryId`] in hex characters, always padded.
pub const HEX_LEN: usize = 22;
/// Maximum length of the alphadecimal form.
pub const ALNUM_LEN: usize = 19;
/// Minimum (padded) length of the alphadecimal form.
pub const MIN_ALNUM_LEN: usize = 16;

const TIMESTAMP_BITS: u32 = 46;
const RANDOM_BITS: u32 = 88 - TIMESTAMP_BITS;

/// Fixed-width 88-bit identifier used for primary keys.
///
/// The high 46 bits hold a millisecond timestamp, so identifiers generated
/// later sort after earlier ones both as bytes and in their alphadecimal
/// form. Rows carry the raw 11 bytes; caches and pagination tokens use the
/// lowercase base-36 "alphadecimal" rendering, which is safe to embed in
/// keys and URLs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BinaryId([u8; BIN_LEN]);

impl BinaryId {
    /// Generate a new timestamped identifier.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let timestamp = millis & ((1u128 << TIMESTAMP_BITS) - 1);
        let random = u128::from(rand::random::<u64>()) & ((1u128 << RANDOM_BITS) - 1);
        Self::from_u128((timestamp << RANDOM_BITS) | random)
    }

    /// Build from the low 88 bits of `value`.
    pub fn from_u128(value: u128) -> Self {
        let bytes = value.to_be_bytes();
        let mut arr = [0u8; BIN_LEN];
        arr.copy_from_slice(&bytes[16 - BIN_LEN..]);
        Self(arr)
    }

    /// The numeric value of this identifier.
    pub fn to_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        bytes[16 - BIN_LEN..].copy_from_slice(&self.0);
        u128::from_be_bytes(bytes)
    }

    /// Create from raw bytes, which must be exactly [`BIN_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() != BIN_LEN {
            return Err(TypeError::InvalidLength {
                expected: BIN_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; BIN_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// The raw 11 bytes.
    pub fn as_bytes(&self) -> &[u8; BIN_LEN] {
        &self.0
    }

    /// Padded lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 22 character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        if s.len() != HEX_LEN {
            return Err(TypeError::InvalidLength {
                expected: HEX_LEN,
                actual: s.len(),
            });
        }
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Lowercase base-36 representation, left-padded to [`MIN_ALNUM_LEN`].
    pub fn to_alphadecimal(&self) -> String {
        let mut value = self.to_u128();
        let mut digits = Vec::with_capacity(ALNUM_LEN);
        while value > 0 {
            let digit = (value % 36) as u32;
            digits.push(char::from_digit(digit, 36).unwrap_or('0'));
            value /= 36;
        }
        while digits.len() < MIN_ALNUM_LEN {
            digits.push('0');
        }
        digits.iter().rev().collect()
    }

    /// Parse the alphadecimal form. Upper case input is rejected so that
    /// one identifier has exactly one textual form.
    pub fn from_alphadecimal(s: &str) -> Result<Self, TypeError> {
        let valid = (MIN_ALNUM_LEN..=ALNUM_LEN).contains(&s.len())
            && s.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase());
        if !valid {
            return Err(TypeError::InvalidAlphadecimal(s.to_string()));
        }
        let value = u128::from_str_radix(s, 36)
            .map_err(|_| TypeError::InvalidAlphadecimal(s.to_string()))?;
        if value >> 88 != 0 {
            return Err(TypeError::InvalidAlphadecimal(s.to_string()));
        }
        Ok(Self::from_u128(value))
    }

    /// Parse either the hex or the alphadecimal form.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if s.len() == HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Self::from_hex(s);
        }
        Self::from_alphadecimal(s)
    }
}

impl fmt::Debug for BinaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BinaryId({})", self.to_alphadecimal())
    }
}

impl fmt::Display for BinaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_alphadecimal())
    }
}

impl From<[u8; BIN_LEN]> for BinaryId {
    fn from(bytes: [u8; BIN_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<BinaryId> for [u8; BIN_LEN] {
    fn from(id: BinaryId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn alphadecimal_is_padded() {
        let id = BinaryId::from_u128(1);
        let alnum = id.to_alphadecimal();
        assert_eq!(alnum.len(), MIN_ALNUM_LEN);
        assert_eq!(alnum, "0000000000000001");
    }

    #[test]
    fn max_value_fits_alnum_len() {
        let id = BinaryId::from_u128((1u128 << 88) - 1);
        assert!(id.to_alphadecimal().len() <= ALNUM_LEN);
    }

    #[test]
    fn uppercase_alphadecimal_rejected() {
        let alnum = BinaryId::from_u128(123_456_789).to_alphadecimal().to_uppercase();
        assert!(BinaryId::from_alphadecimal(&alnum).is_err());
    }

    #[test]
    fn hex_roundtrip() {
        let id = BinaryId::generate();
        let hex = id.to_hex();
        assert_eq!(hex.len(), HEX_LEN);
        assert_eq!(BinaryId::from_hex(&hex).unwrap(), id);
        assert_eq!(BinaryId::parse(&hex).unwrap(), id);
    }

    #[test]
    fn from_slice_checks_length() {
        let err = BinaryId::from_slice(&[0u8; 16]).unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: BIN_LEN,
                actual: 16
            }
        );
    }

    #[test]
    fn generated_ids_are_time_ordered() {
        let first = BinaryId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = BinaryId::generate();
        assert!(first < second);
    }

    proptest! {
        #[test]
        fn alphadecimal_roundtrip(value in 0u128..(1u128 << 88)) {
            let id = BinaryId::from_u128(value);
            let parsed = BinaryId::from_alphadecimal(&id.to_alphadecimal()).unwrap();
            prop_assert_eq!(parsed, id);
        }

        #[test]
        fn alphadecimal_preserves_order(a in 0u128..(1u128 << 88), b in 0u128..(1u128 << 88)) {
            let (ia, ib) = (BinaryId::from_u128(a), BinaryId::from_u128(b));
            let (sa, sb) = (ia.to_alphadecimal(), ib.to_alphadecimal());
            // equal-length strings compare like the numbers they encode
            if sa.len() == sb.len() {
                prop_assert_eq!(sa.cmp(&sb), ia.cmp(&ib));
            }
        }
    }
}
