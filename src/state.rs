//! Seams to the node's state machine and crypto subsystem.
//!
//! The synchronizer never executes transactions or checks consensus
//! rules itself; it hands blocks to a [`StateFacade`] and handshake
//! signatures to a [`Crypto`] implementation provided by the embedding
//! node.

use bytes::{Buf, BufMut, Bytes};
use std::fmt;

use crate::peer::PublicKey;

/// Aggregated proof that a block is finalized at a given height.
///
/// The payload is opaque to the synchronizer; only the height is read
/// here, the rest is forwarded to the state facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Height this certificate finalizes.
    pub height: u32,
    /// Consensus round the certificate was formed in.
    pub round: u8,
    /// Opaque aggregated signature material.
    pub data: Bytes,
}

impl Certificate {
    /// Largest accepted certificate payload on the wire.
    pub const MAX_DATA_SIZE: usize = 64 * 1024;

    /// Encode the certificate into a buffer.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.height);
        buf.put_u8(self.round);
        buf.put_u32(self.data.len() as u32);
        buf.put_slice(&self.data);
    }

    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        4 + 1 + 4 + self.data.len()
    }

    /// Decode a certificate from a buffer.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 9 {
            return None;
        }
        let height = buf.get_u32();
        let round = buf.get_u8();
        let len = buf.get_u32() as usize;
        if len > Self::MAX_DATA_SIZE || buf.remaining() < len {
            return None;
        }
        Some(Self {
            height,
            round,
            data: buf.copy_to_bytes(len),
        })
    }
}

/// Why a block commit was refused by the state layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    /// The block does not extend the current tip.
    NonContiguous {
        /// Height the state expected next.
        expected: u32,
        /// Height that was offered.
        got: u32,
    },
    /// The block failed the integrity check (bad hash, bad framing).
    InvalidBlock(String),
    /// The certificate does not finalize the offered block.
    InvalidCertificate(String),
    /// The state layer is not able to accept commits right now.
    Unavailable(String),
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::NonContiguous { expected, got } => {
                write!(f, "non-contiguous block: expected {}, got {}", expected, got)
            }
            CommitError::InvalidBlock(msg) => write!(f, "invalid block: {}", msg),
            CommitError::InvalidCertificate(msg) => {
                write!(f, "invalid certificate: {}", msg)
            }
            CommitError::Unavailable(msg) => write!(f, "state unavailable: {}", msg),
        }
    }
}

impl std::error::Error for CommitError {}

/// Narrow contract onto the node's state machine.
///
/// Implementations must be thread-safe; calls arrive from the event
/// loop but may also come from tests and the embedding node.
#[auto_impl::auto_impl(Box, Arc)]
pub trait StateFacade: Send + Sync + 'static {
    /// Height of the last committed block.
    fn last_block_height(&self) -> u32;

    /// Certificate finalizing the current tip.
    fn last_certificate(&self) -> Certificate;

    /// Commit a block at `height`.
    ///
    /// Committing at or below the current tip is a no-op and must not
    /// error, so replayed responses stay harmless. A certificate, when
    /// present, finalizes the same height.
    fn commit_block(
        &self,
        height: u32,
        block: Bytes,
        certificate: Option<Certificate>,
    ) -> Result<(), CommitError>;

    /// Read the serialized block at `height`, if stored.
    fn block_at(&self, height: u32) -> Option<Bytes>;
}

/// Narrow contract onto the node's crypto subsystem.
///
/// Used only for the handshake: signing our own hello and verifying the
/// hellos of others. Block and certificate validation stay behind the
/// state facade.
#[auto_impl::auto_impl(Box, Arc)]
pub trait Crypto: Send + Sync + 'static {
    /// This node's consensus public key.
    fn public_key(&self) -> PublicKey;

    /// Sign `message` with this node's consensus key.
    fn sign(&self, message: &[u8]) -> Bytes;

    /// Verify `signature` over `message` against `public_key`.
    fn verify(&self, public_key: &PublicKey, message: &[u8], signature: &[u8]) -> bool;
}
