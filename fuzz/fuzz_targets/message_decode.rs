//! Fuzz the message codec.
//!
//! Arbitrary payloads must never panic, and every accepted message must
//! re-encode to exactly the bytes that decode back to it.

#![no_main]

use blocksync::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some(message) = Message::decode_from_slice(data) else {
        return;
    };
    let encoded = message.encode_to_bytes();
    assert_eq!(encoded.len(), message.encoded_len());
    let again = Message::decode_from_slice(&encoded).expect("re-encoded message must decode");
    assert_eq!(again, message);
});
