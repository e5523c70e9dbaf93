//! Wallets: P-256 keypairs, base58check addresses, and the per-node keyring
//! file.
//!
//! The keyring is a JSON map from address to keypair, with key material
//! hex-encoded so the file stays self-describing and diffable. It is
//! rewritten atomically (temp file + rename) on every mutation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::{self, signatures, ADDRESS_CHECKSUM_LEN};
use crate::error::{Error, Result};

/// Version byte prepended to the public-key hash in an address.
pub const ADDRESS_VERSION: u8 = 0x00;

/// A single keypair: the raw private scalar plus the X||Y public point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    #[serde(with = "hex_bytes")]
    pub secret_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Self {
        let (secret_key, public_key) = signatures::new_key_pair();
        Wallet {
            secret_key,
            public_key,
        }
    }

    /// Base58( version || RIPEMD160(SHA256(pubkey)) || checksum4 ).
    pub fn address(&self) -> String {
        let pub_key_hash = crypto::hash_pub_key(&self.public_key);

        let mut payload = Vec::with_capacity(1 + pub_key_hash.len() + ADDRESS_CHECKSUM_LEN);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(&pub_key_hash);
        let check = crypto::checksum(&payload);
        payload.extend_from_slice(&check);

        bs58::encode(payload).into_string()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Recomputes the checksum of a base58check address.
pub fn validate_address(address: &str) -> bool {
    let Ok(payload) = bs58::decode(address).into_vec() else {
        return false;
    };
    if payload.len() <= 1 + ADDRESS_CHECKSUM_LEN {
        return false;
    }
    let (body, actual) = payload.split_at(payload.len() - ADDRESS_CHECKSUM_LEN);
    crypto::checksum(body) == actual
}

/// Strips the version byte and trailing checksum, leaving the public-key
/// hash an output is locked to.
pub fn pub_key_hash_from_address(address: &str) -> Result<Vec<u8>> {
    if !validate_address(address) {
        return Err(Error::InvalidAddress(address.to_string()));
    }
    let payload = bs58::decode(address)
        .into_vec()
        .map_err(|_| Error::InvalidAddress(address.to_string()))?;
    Ok(payload[1..payload.len() - ADDRESS_CHECKSUM_LEN].to_vec())
}

/// The persistent keyring for one node.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
    #[serde(skip)]
    path: PathBuf,
}

impl Wallets {
    /// Loads the keyring at `path`, starting empty if the file is absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut wallets = if path.exists() {
            let contents = fs::read(&path)?;
            serde_json::from_slice::<Wallets>(&contents)?
        } else {
            Wallets::default()
        };
        wallets.path = path;
        Ok(wallets)
    }

    /// Generates a keypair, persists the keyring, returns the new address.
    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new();
        let address = wallet.address();
        self.wallets.insert(address.clone(), wallet);
        self.save()?;
        Ok(address)
    }

    pub fn get_wallet(&self, address: &str) -> Result<&Wallet> {
        self.wallets
            .get(address)
            .ok_or_else(|| Error::NotFound(format!("wallet for {}", address)))
    }

    pub fn addresses(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.wallets.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    /// Writes to a temp file next to the final location, then renames over
    /// it. Rename is atomic within one filesystem.
    pub fn save(&self) -> Result<()> {
        let contents = serde_json::to_vec_pretty(self)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn test_fresh_wallet_address_validates() {
        let wallet = Wallet::new();
        assert!(validate_address(&wallet.address()));
    }

    #[test]
    fn test_pub_key_hash_roundtrip() {
        let wallet = Wallet::new();
        let expected = crypto::hash_pub_key(&wallet.public_key);
        let got = pub_key_hash_from_address(&wallet.address()).unwrap();
        assert_eq!(got, expected);
    }

    #[rstest]
    #[case("")]
    #[case("not-base58-0OIl")]
    #[case("1111")]
    #[case("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz")]
    fn test_bad_addresses_rejected(#[case] address: &str) {
        assert!(!validate_address(address));
        assert!(matches!(
            pub_key_hash_from_address(address),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_corrupted_address_fails_checksum() {
        let wallet = Wallet::new();
        let mut address = wallet.address().into_bytes();
        // Swap a middle character for a different base58 digit.
        let i = address.len() / 2;
        address[i] = if address[i] == b'2' { b'3' } else { b'2' };
        let corrupted = String::from_utf8(address).unwrap();
        assert!(!validate_address(&corrupted));
    }

    #[test]
    fn test_keyring_roundtrip_is_exact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet_test.dat");

        let mut wallets = Wallets::open(&path).unwrap();
        let addr1 = wallets.create_wallet().unwrap();
        let addr2 = wallets.create_wallet().unwrap();
        assert_ne!(addr1, addr2);

        let original1 = wallets.get_wallet(&addr1).unwrap().clone();

        let reloaded = Wallets::open(&path).unwrap();
        assert_eq!(reloaded.addresses(), wallets.addresses());
        let restored = reloaded.get_wallet(&addr1).unwrap();
        assert_eq!(restored.secret_key, original1.secret_key);
        assert_eq!(restored.public_key, original1.public_key);
        // The reloaded scalar still derives the same point.
        let key = signatures::signing_key_from_bytes(&restored.secret_key).unwrap();
        assert_eq!(signatures::public_key_bytes(&key), restored.public_key);
    }

    #[test]
    fn test_unknown_wallet_is_not_found() {
        let dir = TempDir::new().unwrap();
        let wallets = Wallets::open(dir.path().join("w.dat")).unwrap();
        assert!(matches!(
            wallets.get_wallet("nothere"),
            Err(Error::NotFound(_))
        ));
    }
}
