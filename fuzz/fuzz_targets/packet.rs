#![no_main]

use libfuzzer_sys::fuzz_target;
use niu_core::packet::peek_meta;
use niu_core::PacketProtocol;

fuzz_target!(|data: &[u8]| {
    // Header peek and full decode must never panic on any input.
    let peeked = peek_meta(data);
    let decoded = PacketProtocol::default().decode_value(data);

    if let Ok(packet) = decoded {
        assert_eq!(peeked.ok(), Some(packet.meta), "decode disagrees with peek");

        let protocol = PacketProtocol::default();
        if let Ok(encoded) = protocol.encode(&packet.meta, packet.payload.as_ref()) {
            let again = protocol.decode_value(&encoded);
            assert!(again.is_ok(), "re-encoded packet failed to decode");
        }
    }
});
