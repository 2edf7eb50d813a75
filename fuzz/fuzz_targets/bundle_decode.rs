//! Fuzz the bundle envelope decoder.
//!
//! Arbitrary frames must never panic or allocate past the frame cap,
//! and every accepted frame must re-encode to something decodable.

#![no_main]

use blocksync::Bundle;
use libfuzzer_sys::fuzz_target;

const MAX_FRAME: usize = 1024 * 1024;

fuzz_target!(|data: &[u8]| {
    let Ok(bundle) = Bundle::decode(data, MAX_FRAME) else {
        return;
    };
    // Accepted frames round-trip through our own encoder.
    let reencoded = bundle.encode(usize::MAX);
    let again = Bundle::decode(&reencoded, MAX_FRAME).expect("re-encoded frame must decode");
    assert_eq!(again.message, bundle.message);
    assert_eq!(again.network_id, bundle.network_id);
});
