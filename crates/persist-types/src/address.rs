use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Content-addressed identifier for a stored primitive.
///
/// For most primitives an `Address` is the BLAKE3 hash of the primitive's
/// canonical body. Dynamic bindings additionally carry an identity-derived
/// outer address that stays stable across frames.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; 32]);

impl Address {
    /// Length of an address in bytes.
    pub const LEN: usize = 32;

    /// Compute an `Address` from raw bytes (no domain separation).
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Create an `Address` from a pre-computed hash.
    pub const fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s.trim()).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Build from a byte slice that must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: Self::LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<Address> for [u8; 32] {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl std::str::FromStr for Address {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn from_bytes_is_deterministic() {
        assert_eq!(Address::from_bytes(b"hello"), Address::from_bytes(b"hello"));
        assert_ne!(Address::from_bytes(b"hello"), Address::from_bytes(b"world"));
    }

    #[test]
    fn short_hex_is_8_chars() {
        let address = Address::from_bytes(b"test");
        assert_eq!(address.short_hex().len(), 8);
        assert!(address.to_hex().starts_with(&address.short_hex()));
    }

    #[test]
    fn debug_uses_short_form() {
        let address = Address::from_hash([0xab; 32]);
        assert_eq!(format!("{address:?}"), "Address(abababab)");
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        let err = Address::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 32,
                actual: 2
            }
        );
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(matches!(
            Address::from_hex("not hex at all"),
            Err(TypeError::InvalidHex(_))
        ));
    }

    #[test]
    fn parse_via_from_str() {
        let address = Address::from_bytes(b"parse");
        let parsed: Address = address.to_string().parse().unwrap();
        assert_eq!(parsed, address);
    }

    proptest! {
        #[test]
        fn hex_form_is_lossless(bytes in proptest::array::uniform32(any::<u8>())) {
            let address = Address::from_hash(bytes);
            prop_assert_eq!(Address::from_hex(&address.to_hex()).unwrap(), address);
        }
    }
}
