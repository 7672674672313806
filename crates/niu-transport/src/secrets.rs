//! Session secret persistence.
//!
//! The client keeps two bundles in the host store: the public bundle (sign public key
//! and box public key) and the private bundle (the matching private seeds). The
//! public bundle string doubles as the session id sent in `x-session`, so the server
//! can recover the client's public keys from it.
//!
//! Secrets are rebuilt from storage on every request and never cached.

use crate::config::ClientConfig;
use crate::Result;
use niu_crypto::{decode_secret, encode_secret, generate_box_key_pair, generate_sign_key_pair};
use niu_crypto::KeyPair;
use niu_platform::KeyValueStore;
use tracing::{debug, info, warn};

/// Storage key of the client id.
pub const CLIENT_ID_KEY: &str = "cid";

/// Storage key of the platform id.
pub const PLATFORM_KEY: &str = "platform";

/// Storage key of the UI theme.
pub const THEME_KEY: &str = "theme";

/// Theme written when none is stored.
pub const DEFAULT_THEME: &str = "auto";

/// Length of a client id in hex characters.
pub const CLIENT_ID_LEN: usize = 32;

/// Key material of one client session.
pub struct SessionSecrets {
    /// X25519 pair used for body encryption.
    pub box_key_pair: KeyPair,
    /// Ed25519 pair used for request signatures.
    pub sign_key_pair: KeyPair,
    /// Public bundle string, sent as `x-session`.
    pub session_id: String,
}

impl std::fmt::Debug for SessionSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSecrets")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Rebuild the session secrets from storage.
///
/// Returns `Ok(None)` when either bundle is missing or does not decode.
///
/// # Errors
///
/// - `Error::Storage` if the store cannot be read
/// - `Error::Crypto` if a decoded key has the wrong shape
pub fn load_secrets(
    store: &dyn KeyValueStore,
    config: &ClientConfig,
) -> Result<Option<SessionSecrets>> {
    let Some(public_bundle) = store.get(&config.secret_public_name)? else {
        return Ok(None);
    };
    let Some(private_bundle) = store.get(&config.secret_private_name)? else {
        return Ok(None);
    };

    let (Some(public), Some(private)) =
        (decode_secret(&public_bundle), decode_secret(&private_bundle))
    else {
        warn!("stored secret bundle is corrupt");
        return Ok(None);
    };

    Ok(Some(SessionSecrets {
        box_key_pair: KeyPair::from_parts(public.box_key, &private.box_key)?,
        sign_key_pair: KeyPair::from_parts(public.sign, &private.sign)?,
        session_id: public_bundle,
    }))
}

/// Load the session secrets, generating and persisting fresh ones when storage is
/// empty or corrupt.
///
/// # Example
///
/// ```
/// use niu_platform::mock::MemoryStore;
/// use niu_transport::config::ClientConfig;
/// use niu_transport::secrets::{ensure_secrets, load_secrets};
///
/// let store = MemoryStore::new();
/// let config = ClientConfig::default();
/// let created = ensure_secrets(&store, &config).unwrap();
/// let loaded = load_secrets(&store, &config).unwrap().unwrap();
/// assert_eq!(created.session_id, loaded.session_id);
/// assert_eq!(created.sign_key_pair.public_key(), loaded.sign_key_pair.public_key());
/// ```
pub fn ensure_secrets(store: &dyn KeyValueStore, config: &ClientConfig) -> Result<SessionSecrets> {
    if let Some(secrets) = load_secrets(store, config)? {
        return Ok(secrets);
    }

    let sign_key_pair = generate_sign_key_pair();
    let box_key_pair = generate_box_key_pair();

    let public_bundle = encode_secret(sign_key_pair.public_key(), box_key_pair.public_key());
    let private_bundle = encode_secret(&sign_key_pair.seed(), &box_key_pair.seed());

    store.set(&config.secret_public_name, &public_bundle)?;
    store.set(&config.secret_private_name, &private_bundle)?;
    info!("generated session secrets");

    Ok(SessionSecrets {
        box_key_pair,
        sign_key_pair,
        session_id: public_bundle,
    })
}

/// Remove both secret bundles from storage.
pub fn erase_secrets(store: &dyn KeyValueStore, config: &ClientConfig) -> Result<()> {
    store.remove(&config.secret_public_name)?;
    store.remove(&config.secret_private_name)?;
    debug!("erased session secrets");
    Ok(())
}

/// Return the stored client id, writing a fresh one when missing or malformed.
pub fn ensure_client_id(store: &dyn KeyValueStore) -> Result<String> {
    if let Some(cid) = store.get(CLIENT_ID_KEY)? {
        if is_valid_client_id(&cid) {
            return Ok(cid);
        }
        warn!("stored client id is malformed, regenerating");
    }

    let cid = uuid::Uuid::new_v4().simple().to_string();
    store.set(CLIENT_ID_KEY, &cid)?;
    Ok(cid)
}

/// Return the stored theme, writing the default when none is stored.
pub fn ensure_theme(store: &dyn KeyValueStore) -> Result<String> {
    match store.get(THEME_KEY)? {
        Some(theme) if !theme.is_empty() => Ok(theme),
        _ => {
            store.set(THEME_KEY, DEFAULT_THEME)?;
            Ok(DEFAULT_THEME.to_string())
        }
    }
}

fn is_valid_client_id(cid: &str) -> bool {
    cid.len() == CLIENT_ID_LEN && cid.bytes().all(|b| b.is_ascii_hexdigit())
}
