//! # Core Identifiers
//!
//! ## Clusters
//!
//! - **Hashes**: `Hash`, [`keccak256`], [`sha256`]
//! - **Identifiers**: [`Id`] (chains, assets, blocks, transactions), [`ShortId`]
//! - **Accounts**: `Address`

use crate::errors::SharedTypesError;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::{Digest, Keccak256};
use std::fmt;

// Re-export U256 from primitive-types for balances across all crates
pub use primitive_types::U256;

/// A 32-byte hash.
pub type Hash = [u8; 32];

/// A 20-byte Ethereum-style account address.
pub type Address = [u8; 20];

/// 32-byte identifier for chains, assets, blocks and transactions.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id(pub [u8; 32]);

impl Id {
    /// The all-zero identifier.
    pub const EMPTY: Id = Id([0u8; 32]);

    /// Returns true if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex encoding without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, SharedTypesError> {
        Ok(Self(decode_fixed::<32>(s)?))
    }
}

impl From<Hash> for Id {
    fn from(bytes: Hash) -> Self {
        Self(bytes)
    }
}

impl From<Id> for Hash {
    fn from(id: Id) -> Self {
        id.0
    }
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps logs readable
        write!(f, "Id({}..)", hex::encode(&self.0[..6]))
    }
}

/// 20-byte identifier used for UTXO owners.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShortId(pub [u8; 20]);

impl ShortId {
    /// The all-zero short identifier.
    pub const EMPTY: ShortId = ShortId([0u8; 20]);

    /// Returns true if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Parse from hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, SharedTypesError> {
        Ok(Self(decode_fixed::<20>(s)?))
    }
}

impl From<Address> for ShortId {
    fn from(bytes: Address) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortId({})", hex::encode(self.0))
    }
}

/// Parse a hex account address, with or without a `0x` prefix.
pub fn parse_address(s: &str) -> Result<Address, SharedTypesError> {
    decode_fixed::<20>(s)
}

/// Format an account address as `0x`-prefixed hex.
pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}

/// Keccak-256 digest.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], SharedTypesError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(trimmed).map_err(|e| SharedTypesError::InvalidHex(e.to_string()))?;
    if bytes.len() != N {
        return Err(SharedTypesError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_hex_roundtrip() {
        let id = Id([0xAB; 32]);
        assert_eq!(Id::from_hex(&id.to_hex()).unwrap(), id);
        assert_eq!(Id::from_hex(&format!("0x{}", id.to_hex())).unwrap(), id);
    }

    #[test]
    fn test_id_wrong_length() {
        let err = Id::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            SharedTypesError::InvalidLength {
                expected: 32,
                actual: 2
            }
        );
    }

    #[test]
    fn test_empty_id_is_zero() {
        assert!(Id::EMPTY.is_zero());
        assert!(!Id([1; 32]).is_zero());
        assert!(ShortId::EMPTY.is_zero());
    }

    #[test]
    fn test_parse_address() {
        let addr = parse_address("0x0100000000000000000000000000000000000000").unwrap();
        assert_eq!(addr[0], 1);
        assert_eq!(format_address(&addr), "0x0100000000000000000000000000000000000000");
        assert!(parse_address("0xzz").is_err());
    }

    #[test]
    fn test_keccak256_empty() {
        // Well-known digest of the empty string
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_id_ordering() {
        assert!(Id([0; 32]) < Id([1; 32]));
        assert!(ShortId([0; 20]) < ShortId([1; 20]));
    }

    #[test]
    fn test_id_serde() {
        let id = Id([7; 32]);
        let json = serde_json::to_string(&id).unwrap();
        let back: Id = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
