//! Digest primitives shared across the crate: the `Hash` newtype,
//! SHA-256 / RIPEMD-160 helpers, and the base58check checksum.

pub mod merkle;
pub mod signatures;

use std::fmt;

use ripemd::Ripemd160;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Length of a public-key hash (RIPEMD160 output).
pub const PUB_KEY_HASH_LEN: usize = 20;

/// Bytes of double-SHA256 appended to an address payload.
pub const ADDRESS_CHECKSUM_LEN: usize = 4;

/// 32-byte SHA-256 hash newtype (binary form). Identifies blocks and
/// transactions; the all-zero value marks the genesis parent pointer and the
/// coinbase input reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[inline]
    pub fn zero() -> Self {
        Hash([0u8; 32])
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

/// Human-readable hex for JSON, raw bytes for bincode.
impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
            Hash::from_slice(&bytes)
                .ok_or_else(|| serde::de::Error::custom("expected 32 bytes of hex"))
        } else {
            let v: Vec<u8> = Deserialize::deserialize(deserializer)?;
            Hash::from_slice(&v).ok_or_else(|| serde::de::Error::custom("expected 32 raw bytes"))
        }
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> Hash {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Hash(out)
}

/// RIPEMD160(SHA256(pub_key)) — the value outputs are locked to.
pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let sha = Sha256::digest(pub_key);
    Ripemd160::digest(sha).to_vec()
}

/// First four bytes of double-SHA256, used as the address checksum.
pub fn checksum(payload: &[u8]) -> Vec<u8> {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    second[..ADDRESS_CHECKSUM_LEN].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256 of the empty string.
        let h = sha256(b"");
        assert_eq!(
            h.to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_pub_key_hash_len() {
        let pkh = hash_pub_key(&[0x04; 64]);
        assert_eq!(pkh.len(), PUB_KEY_HASH_LEN);
    }

    #[test]
    fn test_checksum_len_and_determinism() {
        let a = checksum(b"payload");
        let b = checksum(b"payload");
        assert_eq!(a.len(), ADDRESS_CHECKSUM_LEN);
        assert_eq!(a, b);
        assert_ne!(a, checksum(b"other"));
    }

    #[test]
    fn test_hash_bincode_roundtrip() {
        let h = sha256(b"roundtrip");
        let bytes = bincode::serialize(&h).unwrap();
        let restored: Hash = bincode::deserialize(&bytes).unwrap();
        assert_eq!(h, restored);
    }

    #[test]
    fn test_hash_json_is_hex() {
        let h = sha256(b"json");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h));
        let restored: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(h, restored);
    }

    #[test]
    fn test_zero_hash() {
        assert!(Hash::zero().is_zero());
        assert!(!sha256(b"x").is_zero());
    }
}
