//! Ed25519 message signing.
//!
//! Request signatures are computed over the canonical sign payload and carried in the
//! `x-signature` header as URL-safe base64 without padding.

use crate::keys::KeyPair;
use crate::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Size of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Sign `message` with the seed of `key_pair`.
pub fn sign(key_pair: &KeyPair, message: &[u8]) -> [u8; SIGNATURE_LEN] {
    let signing_key = SigningKey::from_bytes(&key_pair.seed());
    signing_key.sign(message).to_bytes()
}

/// Sign `message` and encode the signature for a header value.
pub fn sign_to_string(key_pair: &KeyPair, message: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(sign(key_pair, message))
}

/// Verify an Ed25519 signature.
///
/// Returns `false` for malformed public keys as well as for bad signatures.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; SIGNATURE_LEN]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    verifying_key
        .verify(message, &Signature::from_bytes(signature))
        .is_ok()
}

/// Decode a header-encoded signature.
///
/// # Errors
///
/// Returns `Error::InvalidSignature` on bad base64 and `Error::InvalidLength` when the
/// decoded value is not 64 bytes.
pub fn decode_signature(encoded: &str) -> Result<[u8; SIGNATURE_LEN]> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;

    bytes.as_slice().try_into().map_err(|_| Error::InvalidLength {
        expected: SIGNATURE_LEN,
        actual: bytes.len(),
    })
}

/// Verify a header-encoded signature. Any decoding problem counts as a failed check.
pub fn verify_str(public_key: &[u8; 32], message: &[u8], encoded: &str) -> bool {
    match decode_signature(encoded) {
        Ok(signature) => verify(public_key, message, &signature),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_sign_key_pair;

    #[test]
    fn test_sign_and_verify() {
        let pair = generate_sign_key_pair();
        let signature = sign(&pair, b"payload");
        assert!(verify(pair.public_key(), b"payload", &signature));
    }

    #[test]
    fn test_split_storage_signs_identically() {
        let pair = generate_sign_key_pair();
        let rebuilt = KeyPair::from_parts(*pair.public_key(), &pair.seed()[..]).unwrap();
        assert_eq!(sign(&pair, b"abc"), sign(&rebuilt, b"abc"));
    }

    #[test]
    fn test_verify_wrong_message() {
        let pair = generate_sign_key_pair();
        let signature = sign(&pair, b"payload");
        assert!(!verify(pair.public_key(), b"payloae", &signature));
    }

    #[test]
    fn test_verify_wrong_key() {
        let pair = generate_sign_key_pair();
        let other = generate_sign_key_pair();
        let signature = sign(&pair, b"payload");
        assert!(!verify(other.public_key(), b"payload", &signature));
    }

    #[test]
    fn test_string_round_trip() {
        let pair = generate_sign_key_pair();
        let encoded = sign_to_string(&pair, b"payload");
        assert!(verify_str(pair.public_key(), b"payload", &encoded));
        assert!(!verify_str(pair.public_key(), b"other", &encoded));
    }

    #[test]
    fn test_decode_signature_errors() {
        assert!(matches!(
            decode_signature("%%%"),
            Err(Error::InvalidSignature(_))
        ));
        assert!(matches!(
            decode_signature(&URL_SAFE_NO_PAD.encode([0u8; 10])),
            Err(Error::InvalidLength { expected: 64, actual: 10 })
        ));
        assert!(!verify_str(&[0u8; 32], b"x", ""));
    }
}
