#![no_main]

use libfuzzer_sys::fuzz_target;
use niu_crypto::{decode_secret, encode_secret};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Decoding arbitrary text never panics; whatever decodes re-encodes to a
    // secret that decodes to the same keys.
    if let Some(secret) = decode_secret(text) {
        let again = decode_secret(&encode_secret(&secret.sign, &secret.box_key));
        assert_eq!(again.map(|s| (s.sign, s.box_key)), Some((secret.sign, secret.box_key)));
    }
});
