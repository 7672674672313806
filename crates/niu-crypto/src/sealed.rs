//! Box encryption between a local box key pair and a peer box public key.
//!
//! The shared X25519 secret is expanded with HKDF-SHA256 into a ChaCha20-Poly1305
//! key. Each message gets a fresh random nonce and is laid out as:
//!
//! ```text
//! nonce[12] || ciphertext || tag[16]
//! ```
//!
//! The peer derives the same key from its own secret and our public key, so one
//! crypter serves both directions.

use crate::kdf::derive_box_key;
use crate::keys::KeyPair;
use crate::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// AEAD nonce length.
pub const NONCE_LEN: usize = 12;

/// AEAD tag length.
pub const TAG_LEN: usize = 16;

/// Symmetric box bound to one local/peer key pairing.
pub struct BoxCrypter {
    key: Zeroizing<[u8; 32]>,
}

impl BoxCrypter {
    /// Derive the box key for `local` talking to `peer_public`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPublicKey` when the peer key is a low-order point
    /// (all-zero shared secret).
    pub fn new(local: &KeyPair, peer_public: &[u8; 32]) -> Result<Self> {
        let secret = StaticSecret::from(*local.seed());
        let shared = Zeroizing::new(*secret.diffie_hellman(&PublicKey::from(*peer_public)).as_bytes());

        if *shared == [0u8; 32] {
            return Err(Error::InvalidPublicKey(
                "peer box key is a low-order point".into(),
            ));
        }

        Ok(Self {
            key: derive_box_key(&shared)?,
        })
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key[..]));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| Error::Encryption("ChaCha20-Poly1305 encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a `nonce || ciphertext || tag` message.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decryption` when the input is too short or fails authentication.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::Decryption(format!(
                "sealed message too short: {} bytes",
                sealed.len()
            )));
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key[..]));
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| Error::Decryption("ChaCha20-Poly1305 authentication failed".into()))
    }

    /// Encrypt and encode as URL-safe base64 for a text body.
    pub fn seal_to_string(&self, plaintext: &[u8]) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(self.encrypt(plaintext)?))
    }

    /// Decode a base64 body and decrypt it.
    pub fn open_from_str(&self, encoded: &str) -> Result<Zeroizing<Vec<u8>>> {
        let sealed = URL_SAFE_NO_PAD
            .decode(encoded.trim().trim_end_matches('='))
            .map_err(|e| Error::Decryption(format!("invalid base64 body: {}", e)))?;
        self.decrypt(&sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_box_key_pair;

    #[test]
    fn test_both_sides_share_a_key() {
        let client = generate_box_key_pair();
        let server = generate_box_key_pair();

        let client_box = BoxCrypter::new(&client, server.public_key()).unwrap();
        let server_box = BoxCrypter::new(&server, client.public_key()).unwrap();

        let sealed = client_box.encrypt(b"{\"a\":1}").unwrap();
        assert_eq!(&server_box.decrypt(&sealed).unwrap()[..], b"{\"a\":1}");

        let reply = server_box.seal_to_string(b"ok").unwrap();
        assert_eq!(&client_box.open_from_str(&reply).unwrap()[..], b"ok");
    }

    #[test]
    fn test_layout_and_fresh_nonce() {
        let pair = generate_box_key_pair();
        let peer = generate_box_key_pair();
        let crypter = BoxCrypter::new(&pair, peer.public_key()).unwrap();

        let a = crypter.encrypt(b"hello").unwrap();
        let b = crypter.encrypt(b"hello").unwrap();
        assert_eq!(a.len(), NONCE_LEN + 5 + TAG_LEN);
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let pair = generate_box_key_pair();
        let peer = generate_box_key_pair();
        let crypter = BoxCrypter::new(&pair, peer.public_key()).unwrap();

        let mut sealed = crypter.encrypt(b"hello").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(crypter.decrypt(&sealed), Err(Error::Decryption(_))));
    }

    #[test]
    fn test_wrong_peer_rejected() {
        let client = generate_box_key_pair();
        let server = generate_box_key_pair();
        let stranger = generate_box_key_pair();

        let sealed = BoxCrypter::new(&client, server.public_key())
            .unwrap()
            .encrypt(b"secret")
            .unwrap();
        let wrong = BoxCrypter::new(&stranger, client.public_key()).unwrap();
        assert!(wrong.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_short_input_rejected() {
        let pair = generate_box_key_pair();
        let crypter = BoxCrypter::new(&pair, generate_box_key_pair().public_key()).unwrap();
        assert!(matches!(crypter.decrypt(&[0u8; 27]), Err(Error::Decryption(_))));
        assert!(crypter.open_from_str("@@@").is_err());
    }

    #[test]
    fn test_low_order_peer_rejected() {
        let pair = generate_box_key_pair();
        assert!(matches!(
            BoxCrypter::new(&pair, &[0u8; 32]),
            Err(Error::InvalidPublicKey(_))
        ));
    }
}
