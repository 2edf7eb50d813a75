//! Protocol message types and their wire codecs.
//!
//! Every message is a tagged variant; dispatch in the synchronizer is
//! keyed on [`MessageTag`]. Integers are big-endian, strings and blobs
//! are length-prefixed, and every length is capped before the payload
//! is read so a hostile frame cannot force a large allocation.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use smallvec::SmallVec;

use crate::{
    peer::{PeerFlags, PeerId, PublicKey},
    state::Certificate,
};

/// Maximum number of blocks a single `BlocksResponse` may carry.
pub const MAX_BLOCKS_PER_RESPONSE: usize = 1024;

/// Largest accepted string field (moniker, agent, reason).
const MAX_STRING: usize = 256;

/// Largest accepted handshake signature.
const MAX_SIGNATURE: usize = 128;

/// Largest accepted single serialized block.
const MAX_BLOCK_DATA: usize = 8 * 1024 * 1024;

/// Message type tags for encoding.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    /// Handshake announcement.
    Hello = 1,
    /// Handshake confirmation.
    HelloAck = 2,
    /// Ask a peer for a height range.
    BlocksRequest = 3,
    /// Deliver blocks or a status for a range request.
    BlocksResponse = 4,
    /// Periodic tip announcement.
    Heartbeat = 5,
    /// Advertisement of a just-committed block.
    BlockAnnounce = 6,
}

impl TryFrom<u8> for MessageTag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageTag::Hello),
            2 => Ok(MessageTag::HelloAck),
            3 => Ok(MessageTag::BlocksRequest),
            4 => Ok(MessageTag::BlocksResponse),
            5 => Ok(MessageTag::Heartbeat),
            6 => Ok(MessageTag::BlockAnnounce),
            _ => Err(value),
        }
    }
}

/// Status code of a handshake confirmation.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeCode {
    /// Handshake accepted.
    Ok = 0,
    /// Handshake refused; see the reason string.
    Rejected = 1,
}

impl TryFrom<u8> for HandshakeCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(HandshakeCode::Ok),
            1 => Ok(HandshakeCode::Rejected),
            _ => Err(value),
        }
    }
}

/// Status code of a block-range response.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// Blocks attached, more may follow.
    MoreBlocks = 0,
    /// Range finished below the serving peer's tip.
    NoMoreBlocks = 1,
    /// The requester reached the serving peer's tip.
    Synced = 2,
    /// Request refused; see the reason string.
    Rejected = 3,
}

impl TryFrom<u8> for ResponseCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResponseCode::MoreBlocks),
            1 => Ok(ResponseCode::NoMoreBlocks),
            2 => Ok(ResponseCode::Synced),
            3 => Ok(ResponseCode::Rejected),
            _ => Err(value),
        }
    }
}

/// Handshake announcement: identity, claims and a signature over them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Announcing peer's identifier.
    pub peer_id: PeerId,
    /// Network the peer believes it is on.
    pub network_id: u8,
    /// Human-readable peer name.
    pub moniker: String,
    /// Software agent string.
    pub agent: String,
    /// The peer's last block height.
    pub height: u32,
    /// Service flags.
    pub flags: PeerFlags,
    /// Consensus public key the claims are signed with.
    pub public_key: PublicKey,
    /// Signature over [`handshake_sign_bytes`].
    pub signature: Bytes,
    /// Random nonce, echoed in the confirmation.
    pub nonce: u64,
}

/// Handshake confirmation carrying the responder's own claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloAck {
    /// Whether the handshake was accepted.
    pub code: HandshakeCode,
    /// Reason for a refusal; empty on success.
    pub reason: String,
    /// Responding peer's identifier.
    pub peer_id: PeerId,
    /// The responder's last block height.
    pub height: u32,
    /// The responder's consensus public key.
    pub public_key: PublicKey,
    /// Signature over [`handshake_sign_bytes`] with the echoed nonce.
    pub signature: Bytes,
    /// Nonce echoed from the hello being confirmed.
    pub nonce: u64,
}

/// Client request for a range of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlocksRequest {
    /// Client-chosen session identifier, echoed in every response.
    pub session_id: u32,
    /// First height requested.
    pub from: u32,
    /// Number of blocks requested.
    pub count: u32,
}

impl BlocksRequest {
    /// Inclusive last height of the requested range.
    ///
    /// With a zero count this wraps to `from - 1`, which keeps the
    /// served-to-tip comparison correct for empty ranges.
    pub const fn to(&self) -> u32 {
        self.from.wrapping_add(self.count).wrapping_sub(1)
    }
}

/// Server response to a [`BlocksRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocksResponse {
    /// Outcome of the request (or of this chunk of it).
    pub code: ResponseCode,
    /// Session the response belongs to.
    pub session_id: u32,
    /// Height of the first attached block; for `Synced`, the height of
    /// the attached certificate.
    pub from: u32,
    /// Human-readable reason; populated for `Rejected`.
    pub reason: String,
    /// Serialized blocks, consecutive starting at `from`.
    pub blocks: SmallVec<[Bytes; 8]>,
    /// Tip certificate; present exactly for `Synced`.
    pub certificate: Option<Certificate>,
}

impl BlocksResponse {
    /// Number of blocks attached.
    pub fn count(&self) -> u32 {
        self.blocks.len() as u32
    }
}

/// Periodic announcement of a node's current tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Sender's last block height.
    pub height: u32,
    /// Sender's current consensus round.
    pub round: u8,
}

/// Advertisement of a block the sender just committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAnnounce {
    /// Height of the announced block.
    pub height: u32,
    /// The serialized block.
    pub block: Bytes,
    /// Certificate finalizing the announced block.
    pub certificate: Certificate,
}

/// A protocol message, tagged for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Handshake announcement.
    Hello(Hello),
    /// Handshake confirmation.
    HelloAck(HelloAck),
    /// Ask for a height range.
    BlocksRequest(BlocksRequest),
    /// Deliver blocks or a range status.
    BlocksResponse(BlocksResponse),
    /// Periodic tip announcement.
    Heartbeat(Heartbeat),
    /// Advertise a just-committed block.
    BlockAnnounce(BlockAnnounce),
}

/// Canonical byte string a handshake signature covers.
pub fn handshake_sign_bytes(network_id: u8, peer_id: &PeerId, height: u32, nonce: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(10 + PeerId::ENCODED_SIZE + 4 + 8);
    buf.put_slice(b"handshake");
    buf.put_u8(network_id);
    peer_id.encode(&mut buf);
    buf.put_u32(height);
    buf.put_u64(nonce);
    buf.freeze()
}

impl Message {
    /// Get the message tag.
    pub const fn tag(&self) -> MessageTag {
        match self {
            Message::Hello(_) => MessageTag::Hello,
            Message::HelloAck(_) => MessageTag::HelloAck,
            Message::BlocksRequest(_) => MessageTag::BlocksRequest,
            Message::BlocksResponse(_) => MessageTag::BlocksResponse,
            Message::Heartbeat(_) => MessageTag::Heartbeat,
            Message::BlockAnnounce(_) => MessageTag::BlockAnnounce,
        }
    }

    /// Short lowercase name for log lines.
    pub const fn name(&self) -> &'static str {
        match self {
            Message::Hello(_) => "hello",
            Message::HelloAck(_) => "hello-ack",
            Message::BlocksRequest(_) => "blocks-request",
            Message::BlocksResponse(_) => "blocks-response",
            Message::Heartbeat(_) => "heartbeat",
            Message::BlockAnnounce(_) => "block-announce",
        }
    }

    /// Encode the message into a buffer.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.tag() as u8);
        match self {
            Message::Hello(m) => {
                m.peer_id.encode(buf);
                buf.put_u8(m.network_id);
                put_string(buf, &m.moniker);
                put_string(buf, &m.agent);
                buf.put_u32(m.height);
                buf.put_u16(m.flags.bits());
                m.public_key.encode(buf);
                put_blob(buf, &m.signature);
                buf.put_u64(m.nonce);
            }
            Message::HelloAck(m) => {
                buf.put_u8(m.code as u8);
                put_string(buf, &m.reason);
                m.peer_id.encode(buf);
                buf.put_u32(m.height);
                m.public_key.encode(buf);
                put_blob(buf, &m.signature);
                buf.put_u64(m.nonce);
            }
            Message::BlocksRequest(m) => {
                buf.put_u32(m.session_id);
                buf.put_u32(m.from);
                buf.put_u32(m.count);
            }
            Message::BlocksResponse(m) => {
                buf.put_u8(m.code as u8);
                buf.put_u32(m.session_id);
                buf.put_u32(m.from);
                put_string(buf, &m.reason);
                buf.put_u16(m.blocks.len() as u16);
                for block in &m.blocks {
                    buf.put_u32(block.len() as u32);
                    buf.put_slice(block);
                }
                match &m.certificate {
                    Some(cert) => {
                        buf.put_u8(1);
                        cert.encode(buf);
                    }
                    None => buf.put_u8(0),
                }
            }
            Message::Heartbeat(m) => {
                buf.put_u32(m.height);
                buf.put_u8(m.round);
            }
            Message::BlockAnnounce(m) => {
                buf.put_u32(m.height);
                buf.put_u32(m.block.len() as u32);
                buf.put_slice(&m.block);
                m.certificate.encode(buf);
            }
        }
    }

    /// Encode the message into a new `Bytes` buffer.
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Calculate the encoded length of the message.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Message::Hello(m) => {
                PeerId::ENCODED_SIZE
                    + 1
                    + 2
                    + m.moniker.len()
                    + 2
                    + m.agent.len()
                    + 4
                    + 2
                    + m.public_key.encoded_len()
                    + 2
                    + m.signature.len()
                    + 8
            }
            Message::HelloAck(m) => {
                1 + 2
                    + m.reason.len()
                    + PeerId::ENCODED_SIZE
                    + 4
                    + m.public_key.encoded_len()
                    + 2
                    + m.signature.len()
                    + 8
            }
            Message::BlocksRequest(_) => 12,
            Message::BlocksResponse(m) => {
                1 + 4
                    + 4
                    + 2
                    + m.reason.len()
                    + 2
                    + m.blocks.iter().map(|b| 4 + b.len()).sum::<usize>()
                    + 1
                    + m.certificate.as_ref().map_or(0, |c| c.encoded_len())
            }
            Message::Heartbeat(_) => 5,
            Message::BlockAnnounce(m) => 4 + 4 + m.block.len() + m.certificate.encoded_len(),
        }
    }

    /// Decode a message from a buffer.
    ///
    /// Returns `None` on truncation, unknown tags, capped-field
    /// overflows, or a body violating a structural invariant
    /// (`MoreBlocks` with no blocks, `Synced` without a certificate
    /// matching the reported height).
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 1 {
            return None;
        }
        let tag = MessageTag::try_from(buf.get_u8()).ok()?;

        match tag {
            MessageTag::Hello => {
                let peer_id = PeerId::decode(buf)?;
                if buf.remaining() < 1 {
                    return None;
                }
                let network_id = buf.get_u8();
                let moniker = get_string(buf)?;
                let agent = get_string(buf)?;
                if buf.remaining() < 6 {
                    return None;
                }
                let height = buf.get_u32();
                let flags = PeerFlags::from_bits(buf.get_u16());
                let public_key = PublicKey::decode(buf)?;
                let signature = get_blob(buf)?;
                if buf.remaining() < 8 {
                    return None;
                }
                let nonce = buf.get_u64();
                Some(Message::Hello(Hello {
                    peer_id,
                    network_id,
                    moniker,
                    agent,
                    height,
                    flags,
                    public_key,
                    signature,
                    nonce,
                }))
            }
            MessageTag::HelloAck => {
                if buf.remaining() < 1 {
                    return None;
                }
                let code = HandshakeCode::try_from(buf.get_u8()).ok()?;
                let reason = get_string(buf)?;
                let peer_id = PeerId::decode(buf)?;
                if buf.remaining() < 4 {
                    return None;
                }
                let height = buf.get_u32();
                let public_key = PublicKey::decode(buf)?;
                let signature = get_blob(buf)?;
                if buf.remaining() < 8 {
                    return None;
                }
                let nonce = buf.get_u64();
                Some(Message::HelloAck(HelloAck {
                    code,
                    reason,
                    peer_id,
                    height,
                    public_key,
                    signature,
                    nonce,
                }))
            }
            MessageTag::BlocksRequest => {
                if buf.remaining() < 12 {
                    return None;
                }
                Some(Message::BlocksRequest(BlocksRequest {
                    session_id: buf.get_u32(),
                    from: buf.get_u32(),
                    count: buf.get_u32(),
                }))
            }
            MessageTag::BlocksResponse => {
                if buf.remaining() < 9 {
                    return None;
                }
                let code = ResponseCode::try_from(buf.get_u8()).ok()?;
                let session_id = buf.get_u32();
                let from = buf.get_u32();
                let reason = get_string(buf)?;
                if buf.remaining() < 2 {
                    return None;
                }
                let count = buf.get_u16() as usize;
                if count > MAX_BLOCKS_PER_RESPONSE {
                    return None;
                }
                let mut blocks = SmallVec::with_capacity(count);
                for _ in 0..count {
                    if buf.remaining() < 4 {
                        return None;
                    }
                    let len = buf.get_u32() as usize;
                    if len > MAX_BLOCK_DATA || buf.remaining() < len {
                        return None;
                    }
                    blocks.push(buf.copy_to_bytes(len));
                }
                if buf.remaining() < 1 {
                    return None;
                }
                let certificate = match buf.get_u8() {
                    0 => None,
                    1 => Some(Certificate::decode(buf)?),
                    _ => return None,
                };
                // Structural invariants of the response codes.
                if code == ResponseCode::MoreBlocks && blocks.is_empty() {
                    return None;
                }
                if code == ResponseCode::Synced {
                    match &certificate {
                        Some(cert) if cert.height == from => {}
                        _ => return None,
                    }
                }
                Some(Message::BlocksResponse(BlocksResponse {
                    code,
                    session_id,
                    from,
                    reason,
                    blocks,
                    certificate,
                }))
            }
            MessageTag::Heartbeat => {
                if buf.remaining() < 5 {
                    return None;
                }
                Some(Message::Heartbeat(Heartbeat {
                    height: buf.get_u32(),
                    round: buf.get_u8(),
                }))
            }
            MessageTag::BlockAnnounce => {
                if buf.remaining() < 8 {
                    return None;
                }
                let height = buf.get_u32();
                let len = buf.get_u32() as usize;
                if len > MAX_BLOCK_DATA || buf.remaining() < len {
                    return None;
                }
                let block = buf.copy_to_bytes(len);
                let certificate = Certificate::decode(buf)?;
                Some(Message::BlockAnnounce(BlockAnnounce {
                    height,
                    block,
                    certificate,
                }))
            }
        }
    }

    /// Decode a message from a byte slice.
    pub fn decode_from_slice(data: &[u8]) -> Option<Self> {
        let mut cursor = std::io::Cursor::new(data);
        Self::decode(&mut cursor)
    }
}

fn put_string(buf: &mut impl BufMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_string(buf: &mut impl Buf) -> Option<String> {
    if buf.remaining() < 2 {
        return None;
    }
    let len = buf.get_u16() as usize;
    if len > MAX_STRING || buf.remaining() < len {
        return None;
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).ok()
}

fn put_blob(buf: &mut impl BufMut, blob: &[u8]) {
    buf.put_u16(blob.len() as u16);
    buf.put_slice(blob);
}

fn get_blob(buf: &mut impl Buf) -> Option<Bytes> {
    if buf.remaining() < 2 {
        return None;
    }
    let len = buf.get_u16() as usize;
    if len > MAX_SIGNATURE || buf.remaining() < len {
        return None;
    }
    Some(buf.copy_to_bytes(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn sample_hello() -> Message {
        Message::Hello(Hello {
            peer_id: PeerId::from_bytes([7; 32]),
            network_id: 42,
            moniker: "node-7".into(),
            agent: "blocksync/0.1".into(),
            height: 1000,
            flags: PeerFlags::FULL_NODE,
            public_key: PublicKey::from_bytes(vec![9u8; 96]),
            signature: Bytes::from(vec![1u8; 64]),
            nonce: 0xDEAD_BEEF,
        })
    }

    #[test]
    fn test_hello_roundtrip() {
        let msg = sample_hello();
        let encoded = msg.encode_to_bytes();
        assert_eq!(encoded.len(), msg.encoded_len());
        assert_eq!(Message::decode_from_slice(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_blocks_response_roundtrip() {
        let msg = Message::BlocksResponse(BlocksResponse {
            code: ResponseCode::MoreBlocks,
            session_id: 3,
            from: 11,
            reason: String::new(),
            blocks: smallvec![Bytes::from_static(b"b11"), Bytes::from_static(b"b12")],
            certificate: None,
        });
        let encoded = msg.encode_to_bytes();
        assert_eq!(encoded.len(), msg.encoded_len());
        assert_eq!(Message::decode_from_slice(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_blocks_request_to_is_inclusive() {
        let req = BlocksRequest {
            session_id: 0,
            from: 11,
            count: 90,
        };
        assert_eq!(req.to(), 100);

        // A zero count yields an empty range ending below `from`.
        let empty = BlocksRequest {
            session_id: 0,
            from: 11,
            count: 0,
        };
        assert_eq!(empty.to(), 10);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(Message::decode_from_slice(&[99, 0, 0, 0]).is_none());
    }

    #[test]
    fn test_truncated_hello_rejected() {
        let encoded = sample_hello().encode_to_bytes();
        for cut in [1, 10, encoded.len() - 1] {
            assert!(Message::decode_from_slice(&encoded[..cut]).is_none());
        }
    }

    #[test]
    fn test_more_blocks_requires_blocks() {
        let msg = Message::BlocksResponse(BlocksResponse {
            code: ResponseCode::MoreBlocks,
            session_id: 1,
            from: 5,
            reason: String::new(),
            blocks: smallvec![],
            certificate: None,
        });
        assert!(Message::decode_from_slice(&msg.encode_to_bytes()).is_none());
    }

    #[test]
    fn test_synced_requires_certificate() {
        let msg = Message::BlocksResponse(BlocksResponse {
            code: ResponseCode::Synced,
            session_id: 1,
            from: 100,
            reason: String::new(),
            blocks: smallvec![],
            certificate: None,
        });
        assert!(Message::decode_from_slice(&msg.encode_to_bytes()).is_none());
    }

    #[test]
    fn test_synced_certificate_height_must_match() {
        let cert = Certificate {
            height: 99,
            round: 0,
            data: Bytes::from_static(b"cert"),
        };
        let msg = Message::BlocksResponse(BlocksResponse {
            code: ResponseCode::Synced,
            session_id: 1,
            from: 100,
            reason: String::new(),
            blocks: smallvec![],
            certificate: Some(cert.clone()),
        });
        assert!(Message::decode_from_slice(&msg.encode_to_bytes()).is_none());

        let good = Message::BlocksResponse(BlocksResponse {
            code: ResponseCode::Synced,
            session_id: 1,
            from: 99,
            reason: String::new(),
            blocks: smallvec![],
            certificate: Some(cert),
        });
        assert!(Message::decode_from_slice(&good.encode_to_bytes()).is_some());
    }

    #[test]
    fn test_oversized_moniker_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageTag::Hello as u8);
        PeerId::from_bytes([0; 32]).encode(&mut buf);
        buf.put_u8(0);
        buf.put_u16(MAX_STRING as u16 + 1);
        buf.put_slice(&vec![b'a'; MAX_STRING + 1]);
        assert!(Message::decode_from_slice(&buf.freeze()).is_none());
    }

    #[test]
    fn test_sign_bytes_are_canonical() {
        let pid = PeerId::from_bytes([1; 32]);
        let a = handshake_sign_bytes(1, &pid, 10, 99);
        let b = handshake_sign_bytes(1, &pid, 10, 99);
        assert_eq!(a, b);
        assert_ne!(a, handshake_sign_bytes(2, &pid, 10, 99));
        assert_ne!(a, handshake_sign_bytes(1, &pid, 11, 99));
        assert_ne!(a, handshake_sign_bytes(1, &pid, 10, 100));
    }

    #[test]
    fn test_heartbeat_roundtrip() {
        let msg = Message::Heartbeat(Heartbeat {
            height: 500,
            round: 2,
        });
        assert_eq!(
            Message::decode_from_slice(&msg.encode_to_bytes()).unwrap(),
            msg
        );
    }

    #[test]
    fn test_block_announce_roundtrip() {
        let msg = Message::BlockAnnounce(BlockAnnounce {
            height: 501,
            block: Bytes::from_static(b"block-501"),
            certificate: Certificate {
                height: 501,
                round: 0,
                data: Bytes::from_static(b"cert"),
            },
        });
        let encoded = msg.encode_to_bytes();
        assert_eq!(encoded.len(), msg.encoded_len());
        assert_eq!(Message::decode_from_slice(&encoded).unwrap(), msg);
    }
}
