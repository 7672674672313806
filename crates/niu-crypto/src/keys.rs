//! Box (X25519) and sign (Ed25519) key pairs.
//!
//! Fresh box pairs are always 32/32. Fresh sign pairs carry a 64-byte private key laid
//! out as `seed[32] || public[32]`; pairs rebuilt from split storage carry only the
//! 32-byte seed. Both shapes sign identically because only the seed is used.
//!
//! # Example
//!
//! ```
//! use niu_crypto::keys::{generate_box_key_pair, generate_sign_key_pair};
//!
//! let boxed = generate_box_key_pair();
//! assert_eq!(boxed.private_key().len(), 32);
//!
//! let signer = generate_sign_key_pair();
//! assert_eq!(signer.private_key().len(), 64);
//! assert_eq!(&signer.private_key()[32..], signer.public_key());
//! ```

use crate::{Error, Result};
use ed25519_dalek::SigningKey;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Length of every public key and private seed handled by this crate.
pub const KEY_LEN: usize = 32;

/// Length of an expanded Ed25519 private key (`seed || public`).
pub const EXPANDED_SIGN_KEY_LEN: usize = 64;

/// An asymmetric key pair.
///
/// The private half is zeroed on drop and redacted from `Debug` output.
#[derive(Clone)]
pub struct KeyPair {
    public_key: [u8; KEY_LEN],
    private_key: Zeroizing<Vec<u8>>,
}

impl KeyPair {
    /// Rebuild a key pair from its stored halves.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPrivateKey` unless the private key is 32 or 64 bytes.
    pub fn from_parts(public_key: [u8; KEY_LEN], private_key: &[u8]) -> Result<Self> {
        if private_key.len() != KEY_LEN && private_key.len() != EXPANDED_SIGN_KEY_LEN {
            return Err(Error::InvalidPrivateKey(format!(
                "expected {} or {} bytes, got {}",
                KEY_LEN,
                EXPANDED_SIGN_KEY_LEN,
                private_key.len()
            )));
        }

        Ok(Self {
            public_key,
            private_key: Zeroizing::new(private_key.to_vec()),
        })
    }

    /// Public key bytes.
    pub fn public_key(&self) -> &[u8; KEY_LEN] {
        &self.public_key
    }

    /// Private key bytes (32 or 64 bytes).
    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    /// The 32-byte private seed, suitable for persisting in a secret bundle.
    pub fn seed(&self) -> Zeroizing<[u8; KEY_LEN]> {
        let mut seed = Zeroizing::new([0u8; KEY_LEN]);
        seed.copy_from_slice(&self.private_key[..KEY_LEN]);
        seed
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Generate a fresh X25519 box key pair from the OS RNG.
pub fn generate_box_key_pair() -> KeyPair {
    let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let public = PublicKey::from(&secret);

    KeyPair {
        public_key: *public.as_bytes(),
        private_key: Zeroizing::new(secret.to_bytes().to_vec()),
    }
}

/// Generate a fresh Ed25519 sign key pair from the OS RNG.
pub fn generate_sign_key_pair() -> KeyPair {
    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);

    KeyPair {
        public_key: signing_key.verifying_key().to_bytes(),
        private_key: Zeroizing::new(signing_key.to_keypair_bytes().to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_key_pair_shape() {
        let pair = generate_box_key_pair();
        assert_eq!(pair.private_key().len(), KEY_LEN);

        let secret = StaticSecret::from(*pair.seed());
        assert_eq!(PublicKey::from(&secret).as_bytes(), pair.public_key());
    }

    #[test]
    fn test_sign_key_pair_shape() {
        let pair = generate_sign_key_pair();
        assert_eq!(pair.private_key().len(), EXPANDED_SIGN_KEY_LEN);
        assert_eq!(&pair.private_key()[KEY_LEN..], pair.public_key());

        let signing_key = SigningKey::from_bytes(&pair.seed());
        assert_eq!(&signing_key.verifying_key().to_bytes(), pair.public_key());
    }

    #[test]
    fn test_fresh_pairs_differ() {
        assert_ne!(
            generate_box_key_pair().public_key(),
            generate_box_key_pair().public_key()
        );
        assert_ne!(
            generate_sign_key_pair().public_key(),
            generate_sign_key_pair().public_key()
        );
    }

    #[test]
    fn test_from_parts_accepts_split_storage() {
        let pair = KeyPair::from_parts([1u8; 32], &[2u8; 32]).unwrap();
        assert_eq!(pair.public_key(), &[1u8; 32]);
        assert_eq!(*pair.seed(), [2u8; 32]);
    }

    #[test]
    fn test_from_parts_rejects_bad_length() {
        let result = KeyPair::from_parts([1u8; 32], &[2u8; 16]);
        assert!(matches!(result, Err(Error::InvalidPrivateKey(_))));
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let pair = KeyPair::from_parts([0u8; 32], &[0xAB; 32]).unwrap();
        let rendered = format!("{:?}", pair);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("171")); // 0xAB
    }
}
