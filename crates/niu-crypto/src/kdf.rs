//! Key derivation (HKDF-SHA256, RFC 5869).

use crate::{Error, Result};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

/// HKDF info label for the box encryption key.
pub const BOX_KEY_INFO: &[u8] = b"niu-box-v1";

/// Generic HKDF-SHA256 key derivation.
///
/// # Arguments
/// * `ikm` - Input key material
/// * `salt` - Salt value (empty slice for no salt)
/// * `info` - Context and application-specific information
/// * `output_len` - Length of output key material
///
/// # Example
/// ```
/// use niu_crypto::kdf::hkdf_sha256;
///
/// let okm = hkdf_sha256(&[0x0b; 22], &[0x00, 0x01], b"info", 42).unwrap();
/// assert_eq!(okm.len(), 42);
/// ```
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);

    let mut okm = Zeroizing::new(vec![0u8; output_len]);
    hk.expand(info, &mut okm)
        .map_err(|_| Error::KeyDerivation("HKDF expansion failed".into()))?;

    Ok(okm)
}

/// Derive the 32-byte box encryption key from an X25519 shared secret.
pub fn derive_box_key(shared_secret: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>> {
    let okm = hkdf_sha256(shared_secret, &[], BOX_KEY_INFO, 32)?;
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&okm);
    Ok(key)
}
