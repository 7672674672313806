//! Persisted secret bundle codec.
//!
//! The client persists its key material as two strings: one bundle holding the sign
//! and box public keys, one holding the matching private seeds. Each bundle is an
//! 88-byte blob:
//!
//! ```text
//! random[24] || sign_key[32] || box_key[32]
//! ```
//!
//! Before encoding, every byte at index `i >= 17` is XOR-ed with the byte at
//! `i % 17`, walking `i` upwards. The blob is then base64 encoded (URL-safe, no
//! padding). The scramble is obfuscation only and provides no confidentiality.
//!
//! # Example
//!
//! ```
//! use niu_crypto::secret::{decode_secret, encode_secret};
//!
//! let encoded = encode_secret(&[7u8; 32], &[9u8; 32]);
//! let decoded = decode_secret(&encoded).unwrap();
//! assert_eq!(decoded.sign, [7u8; 32]);
//! assert_eq!(decoded.box_key, [9u8; 32]);
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use zeroize::Zeroizing;

/// Total blob length in bytes.
pub const SECRET_BLOB_LEN: usize = 88;

/// Length of the random prefix.
pub const RANDOM_PREFIX_LEN: usize = 24;

/// Period of the positional XOR scramble.
const SCRAMBLE_PERIOD: usize = 17;

const SIGN_RANGE: core::ops::Range<usize> = 24..56;
const BOX_RANGE: core::ops::Range<usize> = 56..88;

/// Keys recovered from a secret bundle.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedSecret {
    /// Sign key (public or private seed, depending on the bundle).
    pub sign: [u8; 32],
    /// Box key (public or private, depending on the bundle).
    pub box_key: [u8; 32],
}

impl std::fmt::Debug for DecodedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedSecret").finish_non_exhaustive()
    }
}

/// Encode a sign key and a box key into a scrambled bundle string.
pub fn encode_secret(sign_key: &[u8; 32], box_key: &[u8; 32]) -> String {
    let mut blob = Zeroizing::new([0u8; SECRET_BLOB_LEN]);
    rand::rngs::OsRng.fill_bytes(&mut blob[..RANDOM_PREFIX_LEN]);
    blob[SIGN_RANGE].copy_from_slice(sign_key);
    blob[BOX_RANGE].copy_from_slice(box_key);

    scramble(&mut blob[..]);
    URL_SAFE_NO_PAD.encode(&blob[..])
}

/// Decode a bundle string produced by [`encode_secret`].
///
/// Returns `None` when the input is not valid base64 or does not decode to exactly
/// 88 bytes (the empty string included).
pub fn decode_secret(encoded: &str) -> Option<DecodedSecret> {
    let decoded = Zeroizing::new(URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()?);
    if decoded.len() != SECRET_BLOB_LEN {
        return None;
    }

    let mut blob = Zeroizing::new([0u8; SECRET_BLOB_LEN]);
    blob.copy_from_slice(&decoded);
    scramble(&mut blob[..]);

    let mut sign = [0u8; 32];
    let mut box_key = [0u8; 32];
    sign.copy_from_slice(&blob[SIGN_RANGE]);
    box_key.copy_from_slice(&blob[BOX_RANGE]);

    Some(DecodedSecret { sign, box_key })
}

/// Apply the positional XOR scramble in place.
///
/// The mask bytes (`i % 17`) all lie below index 17 and are never modified, so the
/// same pass both scrambles and unscrambles.
fn scramble(blob: &mut [u8]) {
    for i in SCRAMBLE_PERIOD..blob.len() {
        blob[i] ^= blob[i % SCRAMBLE_PERIOD];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encoded_shape() {
        let encoded = encode_secret(&[1u8; 32], &[2u8; 32]);
        // 88 bytes -> 118 base64 characters without padding
        assert_eq!(encoded.len(), 118);
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+') && !encoded.contains('/'));
    }

    #[test]
    fn test_random_prefix_varies_output() {
        let a = encode_secret(&[1u8; 32], &[2u8; 32]);
        let b = encode_secret(&[1u8; 32], &[2u8; 32]);
        assert_ne!(a, b);
        assert_eq!(decode_secret(&a), decode_secret(&b));
    }

    #[test]
    fn test_scramble_hides_keys() {
        let encoded = encode_secret(&[0x55u8; 32], &[0xAAu8; 32]);
        let raw = URL_SAFE_NO_PAD.decode(encoded).unwrap();
        assert_ne!(&raw[SIGN_RANGE], &[0x55u8; 32][..]);
    }

    #[test]
    fn test_decode_empty_is_none() {
        assert!(decode_secret("").is_none());
    }

    #[test]
    fn test_decode_wrong_length_is_none() {
        let short = URL_SAFE_NO_PAD.encode([0u8; 87]);
        let long = URL_SAFE_NO_PAD.encode([0u8; 89]);
        assert!(decode_secret(&short).is_none());
        assert!(decode_secret(&long).is_none());
    }

    #[test]
    fn test_decode_garbage_is_none() {
        assert!(decode_secret("not base64 at all!!").is_none());
    }

    #[test]
    fn test_decode_tolerates_padding() {
        let encoded = encode_secret(&[3u8; 32], &[4u8; 32]);
        let decoded = decode_secret(&format!("{}==", encoded)).unwrap();
        assert_eq!(decoded.sign, [3u8; 32]);
    }

    proptest! {
        #[test]
        fn prop_round_trip(sign in any::<[u8; 32]>(), box_key in any::<[u8; 32]>()) {
            let decoded = decode_secret(&encode_secret(&sign, &box_key)).unwrap();
            prop_assert_eq!(decoded.sign, sign);
            prop_assert_eq!(decoded.box_key, box_key);
        }

        #[test]
        fn prop_wrong_length_rejected(bytes in proptest::collection::vec(any::<u8>(), 0..200)) {
            prop_assume!(bytes.len() != SECRET_BLOB_LEN);
            prop_assert!(decode_secret(&URL_SAFE_NO_PAD.encode(&bytes)).is_none());
        }
    }
}
