//! The wire envelope wrapping one protocol message.
//!
//! ```text
//! bundle  := version:u8 | flags:u16 | network_id:u8 | payload_len:u32 | payload
//! payload := message_type:u8 | message_body
//! ```
//!
//! The payload is optionally gzip-compressed, signalled by the
//! `COMPRESSED` flag. A frame with an unknown version or a declared
//! payload length over the configured cap is rejected before the
//! payload is touched.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::{
    compression,
    error::{Error, Result},
    message::Message,
};

/// Wire format version this build speaks.
pub const BUNDLE_VERSION: u8 = 1;

/// Fixed size of the bundle header.
pub const HEADER_SIZE: usize = 8;

/// Flag bits carried in the bundle envelope.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct BundleFlags(u16);

impl BundleFlags {
    /// Payload is gzip-compressed.
    pub const COMPRESSED: BundleFlags = BundleFlags(0x0001);
    /// Bundle was sent to every peer, not unicast.
    pub const BROADCAST: BundleFlags = BundleFlags(0x0002);
    /// Bundle carries a handshake confirmation.
    pub const HELLO_ACK: BundleFlags = BundleFlags(0x0004);

    /// Create flags from the raw bitfield.
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw bitfield value.
    pub const fn bits(&self) -> u16 {
        self.0
    }

    /// Whether all bits of `other` are set.
    pub const fn contains(&self, other: BundleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Combine with another flag set.
    pub const fn with(self, other: BundleFlags) -> Self {
        Self(self.0 | other.0)
    }

    /// Clear the bits of another flag set.
    pub const fn without(self, other: BundleFlags) -> Self {
        Self(self.0 & !other.0)
    }
}

impl fmt::Debug for BundleFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BundleFlags({:#06x})", self.0)
    }
}

/// Parsed bundle header, available before the payload is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleHeader {
    /// Wire format version.
    pub version: u8,
    /// Envelope flags.
    pub flags: BundleFlags,
    /// Network the frame belongs to.
    pub network_id: u8,
    /// Declared payload length in bytes.
    pub payload_len: u32,
}

/// Parse just the fixed header of a frame.
///
/// No validation beyond truncation; callers drop foreign-network frames
/// before paying for payload work.
pub fn peek_header(data: &[u8]) -> Result<BundleHeader> {
    if data.len() < HEADER_SIZE {
        return Err(Error::Decode(format!(
            "frame too short for header: {} bytes",
            data.len()
        )));
    }
    let mut buf = data;
    Ok(BundleHeader {
        version: buf.get_u8(),
        flags: BundleFlags::from_bits(buf.get_u16()),
        network_id: buf.get_u8(),
        payload_len: buf.get_u32(),
    })
}

/// A decoded wire frame: envelope fields plus the embedded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Wire format version.
    pub version: u8,
    /// Envelope flags.
    pub flags: BundleFlags,
    /// Network the frame belongs to.
    pub network_id: u8,
    /// The embedded protocol message.
    pub message: Message,
}

impl Bundle {
    /// Wrap a message for the given network.
    pub fn new(network_id: u8, message: Message) -> Self {
        Self {
            version: BUNDLE_VERSION,
            flags: BundleFlags::default(),
            network_id,
            message,
        }
    }

    /// Set additional envelope flags (builder pattern).
    pub fn with_flags(mut self, flags: BundleFlags) -> Self {
        self.flags = self.flags.with(flags);
        self
    }

    /// Encode the bundle into a frame.
    ///
    /// Payloads of at least `compression_min_size` bytes are compressed
    /// when that actually shrinks them.
    pub fn encode(&self, compression_min_size: usize) -> Bytes {
        let payload = self.message.encode_to_bytes();
        // The encoder owns the compression bit; a stale flag from a
        // decoded frame must not survive re-encoding.
        let mut flags = self.flags.without(BundleFlags::COMPRESSED);
        let payload = if payload.len() >= compression_min_size {
            let compressed = compression::compress(&payload);
            if compressed.len() < payload.len() {
                flags = flags.with(BundleFlags::COMPRESSED);
                compressed
            } else {
                payload
            }
        } else {
            payload
        };

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u8(self.version);
        buf.put_u16(flags.bits());
        buf.put_u8(self.network_id);
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);
        buf.freeze()
    }

    /// Decode a frame, enforcing the version and the frame-size cap.
    pub fn decode(data: &[u8], max_frame_size: usize) -> Result<Bundle> {
        let header = peek_header(data)?;
        if header.version != BUNDLE_VERSION {
            return Err(Error::Decode(format!(
                "unknown bundle version: {}",
                header.version
            )));
        }
        if header.payload_len as usize > max_frame_size {
            return Err(Error::Decode(format!(
                "declared payload of {} bytes exceeds cap of {}",
                header.payload_len, max_frame_size
            )));
        }
        let payload = &data[HEADER_SIZE..];
        if payload.len() != header.payload_len as usize {
            return Err(Error::Decode(format!(
                "payload length mismatch: declared {}, got {}",
                header.payload_len,
                payload.len()
            )));
        }

        let message = if header.flags.contains(BundleFlags::COMPRESSED) {
            let inflated = compression::decompress(payload, max_frame_size)
                .map_err(|e| Error::Decode(e.to_string()))?;
            Message::decode_from_slice(&inflated)
        } else {
            Message::decode_from_slice(payload)
        };

        let message =
            message.ok_or_else(|| Error::Decode("malformed message payload".to_string()))?;
        Ok(Bundle {
            version: header.version,
            flags: header.flags,
            network_id: header.network_id,
            message,
        })
    }
}
