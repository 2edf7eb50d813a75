//! Wire message types for the sync protocol.

mod types;

pub use types::{
    handshake_sign_bytes, BlockAnnounce, BlocksRequest, BlocksResponse, HandshakeCode, Heartbeat,
    Hello, HelloAck, Message, MessageTag, ResponseCode, MAX_BLOCKS_PER_RESPONSE,
};
