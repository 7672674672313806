//! Cryptographic primitives for the niu secure transport.
//!
//! This crate provides the narrow set of primitives the transport consumes:
//! - Key pair generation (X25519 box keys, Ed25519 sign keys)
//! - The persisted secret bundle codec (88-byte scrambled blob)
//! - Message signing and verification (Ed25519)
//! - Box encryption between a local and a peer key pair (X25519 + HKDF + ChaCha20-Poly1305)
//!
//! Security rules for this crate:
//! - No unsafe code
//! - All private key bytes and derived keys use `Zeroizing` wrappers
//! - No logging of key material

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod kdf;
pub mod keys;
pub mod sealed;
pub mod secret;
pub mod sign;

pub use error::{Error, Result};
pub use keys::{generate_box_key_pair, generate_sign_key_pair, KeyPair};
pub use sealed::BoxCrypter;
pub use secret::{decode_secret, encode_secret, DecodedSecret};
