//! Peer identity and per-peer record types.

use bytes::{Buf, BufMut, Bytes};
use std::{
    fmt::{self, Debug, Display},
    time::Instant,
};

/// Stable opaque peer identifier (32 bytes, content-hash style).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Size of the peer ID in bytes when encoded.
    pub const ENCODED_SIZE: usize = 32;

    /// Create a peer ID from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of the peer ID.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create a random peer ID (for tests and local defaults).
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Encode the peer ID into a buffer.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }

    /// Decode a peer ID from a buffer.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::ENCODED_SIZE {
            return None;
        }
        let mut bytes = [0u8; 32];
        buf.copy_to_slice(&mut bytes);
        Some(Self(bytes))
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form: first four bytes are enough to tell peers apart in logs.
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..")
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// Claimed consensus public key, carried opaquely through the handshake.
///
/// The core never interprets the key material; verification goes through
/// the [`Crypto`](crate::state::Crypto) seam.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(Bytes);

impl PublicKey {
    /// Largest accepted key length on the wire.
    pub const MAX_SIZE: usize = 128;

    /// Wrap raw key material.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Get the raw key material.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encode the key (length-prefixed) into a buffer.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.0.len() as u16);
        buf.put_slice(&self.0);
    }

    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        2 + self.0.len()
    }

    /// Decode a key from a buffer.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 2 {
            return None;
        }
        let len = buf.get_u16() as usize;
        if len > Self::MAX_SIZE || buf.remaining() < len {
            return None;
        }
        Some(Self(buf.copy_to_bytes(len)))
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(")?;
        for b in self.0.iter().take(6) {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

/// Service flags a peer announces in its handshake.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerFlags(u16);

impl PeerFlags {
    /// The peer retains and serves the full block history (archival).
    pub const FULL_NODE: PeerFlags = PeerFlags(0x0001);

    /// Create flags from the raw bitfield.
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw bitfield value.
    pub const fn bits(&self) -> u16 {
        self.0
    }

    /// Whether all bits of `other` are set.
    pub const fn contains(&self, other: PeerFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Debug for PeerFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerFlags({:#06x})", self.0)
    }
}

/// Connection status of a peer.
///
/// Allowed transitions:
///
/// ```text
/// Unknown      -> Connected, Banned
/// Connected    -> Known, Disconnected, Banned
/// Known        -> Disconnected, Banned
/// Banned       -> (terminal until the ban TTL expires)
/// Disconnected -> Connected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerStatus {
    /// Seen on the wire but the transport has not reported it up.
    #[default]
    Unknown,
    /// Transport is up, handshake not yet complete.
    Connected,
    /// Handshake complete; eligible for sync sessions.
    Known,
    /// Dropped for repeated protocol violations.
    Banned,
    /// Transport reported the peer gone.
    Disconnected,
}

impl PeerStatus {
    /// Whether moving from `self` to `next` follows the allowed graph.
    pub fn can_transition_to(self, next: PeerStatus) -> bool {
        use PeerStatus::*;
        matches!(
            (self, next),
            (Unknown, Connected)
                | (Unknown, Banned)
                | (Connected, Known)
                | (Connected, Disconnected)
                | (Connected, Banned)
                | (Known, Disconnected)
                | (Known, Banned)
                | (Disconnected, Connected)
        )
    }

    /// Whether the peer has completed the handshake.
    pub const fn is_known(self) -> bool {
        matches!(self, PeerStatus::Known)
    }

    /// Whether the peer has never been surfaced by the transport.
    pub const fn is_unknown(self) -> bool {
        matches!(self, PeerStatus::Unknown)
    }

    /// Whether the peer is banned.
    pub const fn is_banned(self) -> bool {
        matches!(self, PeerStatus::Banned)
    }
}

impl Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerStatus::Unknown => "unknown",
            PeerStatus::Connected => "connected",
            PeerStatus::Known => "known",
            PeerStatus::Banned => "banned",
            PeerStatus::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Per-peer record kept by the peer set.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Peer identifier.
    pub peer_id: PeerId,
    /// Current connection status.
    pub status: PeerStatus,
    /// Human-readable name claimed in the handshake.
    pub moniker: String,
    /// Software agent string claimed in the handshake.
    pub agent: String,
    /// Consensus public key claimed in the handshake.
    pub public_key: Option<PublicKey>,
    /// Last block height the peer claims to have.
    pub claimed_height: u32,
    /// Service flags claimed in the handshake.
    pub flags: PeerFlags,
    /// Total bundles received from this peer.
    pub received_messages: u64,
    /// Total bytes received from this peer.
    pub received_bytes: u64,
    /// Protocol violations observed inside the current ban window.
    pub invalid_messages: u32,
    /// Failed or rejected sessions; a light selection penalty.
    pub session_failures: u32,

    pub(crate) invalid_window_start: Option<Instant>,
    pub(crate) banned_until: Option<Instant>,
    pub(crate) last_hello_sent: Option<Instant>,
    pub(crate) hello_nonce: Option<u64>,
    pub(crate) last_seen: Instant,
}

impl Peer {
    /// Create a fresh record in the `Unknown` status.
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            status: PeerStatus::Unknown,
            moniker: String::new(),
            agent: String::new(),
            public_key: None,
            claimed_height: 0,
            flags: PeerFlags::default(),
            received_messages: 0,
            received_bytes: 0,
            invalid_messages: 0,
            session_failures: 0,
            invalid_window_start: None,
            banned_until: None,
            last_hello_sent: None,
            hello_nonce: None,
            last_seen: Instant::now(),
        }
    }

    /// Whether the peer announced the archival service flag.
    pub fn is_full_node(&self) -> bool {
        self.flags.contains(PeerFlags::FULL_NODE)
    }
}
