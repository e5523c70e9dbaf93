//! ECDSA P-256 over raw byte material.
//!
//! Keys travel through the system as plain bytes so that wallet files and
//! transaction inputs stay language-neutral: the private key is the 32-byte
//! big-endian scalar, the public key is the 64-byte X||Y concatenation of
//! the uncompressed point, and a signature is the 64-byte r||s pair.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{Error, Result};

/// Length of a serialized public key (X||Y).
pub const PUBLIC_KEY_LEN: usize = 64;

/// Length of a serialized signature (r||s).
pub const SIGNATURE_LEN: usize = 64;

/// Generates a fresh keypair, returning `(secret_scalar, public_xy)`.
pub fn new_key_pair() -> (Vec<u8>, Vec<u8>) {
    let signing_key = SigningKey::random(&mut OsRng);
    let secret = signing_key.to_bytes().to_vec();
    (secret, public_key_bytes(&signing_key))
}

/// X||Y bytes of the public point for a signing key.
pub fn public_key_bytes(signing_key: &SigningKey) -> Vec<u8> {
    let point = signing_key.verifying_key().to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag.
    point.as_bytes()[1..].to_vec()
}

/// Rebuilds a signing key from the stored scalar.
pub fn signing_key_from_bytes(secret: &[u8]) -> Result<SigningKey> {
    SigningKey::from_slice(secret).map_err(|e| Error::MalformedCrypto(e.to_string()))
}

/// Signs `message` (hashed internally with SHA-256), returning r||s bytes.
pub fn sign(secret: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let key = signing_key_from_bytes(secret)?;
    let signature: Signature = key.sign(message);
    Ok(signature.to_bytes().to_vec())
}

/// Verifies an r||s signature over `message` against X||Y public key bytes.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<bool> {
    if public_key.len() != PUBLIC_KEY_LEN {
        return Err(Error::MalformedCrypto(format!(
            "public key must be {} bytes, got {}",
            PUBLIC_KEY_LEN,
            public_key.len()
        )));
    }
    let mut sec1 = Vec::with_capacity(1 + PUBLIC_KEY_LEN);
    sec1.push(0x04);
    sec1.extend_from_slice(public_key);

    let key =
        VerifyingKey::from_sec1_bytes(&sec1).map_err(|e| Error::MalformedCrypto(e.to_string()))?;
    let signature =
        Signature::from_slice(signature).map_err(|e| Error::MalformedCrypto(e.to_string()))?;

    Ok(key.verify(message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_lengths() {
        let (secret, public) = new_key_pair();
        assert_eq!(secret.len(), 32);
        assert_eq!(public.len(), PUBLIC_KEY_LEN);
    }

    #[test]
    fn test_sign_and_verify() {
        let (secret, public) = new_key_pair();
        let sig = sign(&secret, b"payload").unwrap();
        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert!(verify(&public, b"payload", &sig).unwrap());
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let (secret, public) = new_key_pair();
        let mut sig = sign(&secret, b"payload").unwrap();
        sig[10] ^= 0x01;
        assert!(!verify(&public, b"payload", &sig).unwrap());
    }

    #[test]
    fn test_wrong_message_rejected() {
        let (secret, public) = new_key_pair();
        let sig = sign(&secret, b"payload").unwrap();
        assert!(!verify(&public, b"other payload", &sig).unwrap());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let (secret, _) = new_key_pair();
        let (_, other_public) = new_key_pair();
        let sig = sign(&secret, b"payload").unwrap();
        assert!(!verify(&other_public, b"payload", &sig).unwrap());
    }

    #[test]
    fn test_secret_roundtrips_through_bytes() {
        let (secret, public) = new_key_pair();
        let restored = signing_key_from_bytes(&secret).unwrap();
        assert_eq!(public_key_bytes(&restored), public);
    }

    #[test]
    fn test_garbage_key_material_is_error() {
        assert!(matches!(
            verify(&[0u8; 10], b"m", &[0u8; 64]),
            Err(Error::MalformedCrypto(_))
        ));
        assert!(signing_key_from_bytes(&[0u8; 5]).is_err());
    }
}
