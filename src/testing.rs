//! Test doubles for the external collaborators.
//!
//! An in-memory state facade, a deterministic crypto stand-in, and a
//! lossy network wrapper for resilience tests. These ship in the crate
//! so embedding nodes can reuse them in their own integration tests.

use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::{
    network::NetworkService,
    peer::{PeerId, PublicKey},
    state::{Certificate, CommitError, Crypto, StateFacade},
};

/// Deterministic serialized block used across tests.
pub fn test_block(height: u32) -> Bytes {
    Bytes::from(format!("block-{:08}", height))
}

/// Deterministic certificate finalizing `height`.
pub fn test_certificate(height: u32) -> Certificate {
    Certificate {
        height,
        round: 0,
        data: Bytes::from(format!("cert-{:08}", height)),
    }
}

#[derive(Debug)]
struct MockStateInner {
    blocks: Vec<Bytes>,
    certificate: Certificate,
}

/// In-memory state facade backed by a vector of blocks.
///
/// Heights are 1-based; height 0 is the empty chain. Commits verify
/// contiguity and that the block bytes match [`test_block`], standing
/// in for the integrity check a real state machine performs.
#[derive(Debug)]
pub struct MockState {
    inner: Mutex<MockStateInner>,
}

impl MockState {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockStateInner {
                blocks: Vec::new(),
                certificate: test_certificate(0),
            }),
        }
    }

    /// Create a chain pre-filled with blocks at heights `1..=height`.
    pub fn with_blocks(height: u32) -> Self {
        Self {
            inner: Mutex::new(MockStateInner {
                blocks: (1..=height).map(test_block).collect(),
                certificate: test_certificate(height),
            }),
        }
    }

    /// Current tip height (convenience mirror of the facade method).
    pub fn height(&self) -> u32 {
        self.inner.lock().blocks.len() as u32
    }
}

impl Default for MockState {
    fn default() -> Self {
        Self::new()
    }
}

impl StateFacade for MockState {
    fn last_block_height(&self) -> u32 {
        self.inner.lock().blocks.len() as u32
    }

    fn last_certificate(&self) -> Certificate {
        self.inner.lock().certificate.clone()
    }

    fn commit_block(
        &self,
        height: u32,
        block: Bytes,
        certificate: Option<Certificate>,
    ) -> Result<(), CommitError> {
        let mut inner = self.inner.lock();
        let tip = inner.blocks.len() as u32;

        // Replays at or below the tip are harmless.
        if height <= tip {
            return Ok(());
        }
        if height != tip + 1 {
            return Err(CommitError::NonContiguous {
                expected: tip + 1,
                got: height,
            });
        }
        if block != test_block(height) {
            return Err(CommitError::InvalidBlock(format!(
                "integrity check failed at height {}",
                height
            )));
        }
        if let Some(cert) = &certificate {
            if cert.height != height {
                return Err(CommitError::InvalidCertificate(format!(
                    "certificate at {} offered for block {}",
                    cert.height, height
                )));
            }
        }

        inner.blocks.push(block);
        inner.certificate = certificate.unwrap_or_else(|| test_certificate(height));
        Ok(())
    }

    fn block_at(&self, height: u32) -> Option<Bytes> {
        if height == 0 {
            return None;
        }
        self.inner.lock().blocks.get(height as usize - 1).cloned()
    }
}

/// Deterministic crypto stand-in.
///
/// A "signature" is the SHA-256 of the key material and the message,
/// so any test holding a peer's seed can produce frames that verify.
/// Real deployments plug their consensus signature scheme in here.
#[derive(Debug, Clone)]
pub struct MockCrypto {
    key: [u8; 32],
}

impl MockCrypto {
    /// Create a crypto stand-in from a one-byte seed.
    pub fn new(seed: u8) -> Self {
        Self { key: [seed; 32] }
    }
}

impl Crypto for MockCrypto {
    fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.key.to_vec())
    }

    fn sign(&self, message: &[u8]) -> Bytes {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(message);
        Bytes::copy_from_slice(&hasher.finalize())
    }

    fn verify(&self, public_key: &PublicKey, message: &[u8], signature: &[u8]) -> bool {
        let mut hasher = Sha256::new();
        hasher.update(public_key.as_bytes());
        hasher.update(message);
        hasher.finalize().as_slice() == signature
    }
}

/// Wrapper that drops a fraction of outbound frames.
#[derive(Debug, Clone)]
pub struct LossyNetwork<N> {
    inner: N,
    loss_rate: f64,
}

impl<N> LossyNetwork<N> {
    /// Wrap `inner`, dropping each frame with probability `loss_rate`.
    pub fn new(inner: N, loss_rate: f64) -> Self {
        Self {
            inner,
            loss_rate: loss_rate.clamp(0.0, 1.0),
        }
    }

    fn dropped(&self) -> bool {
        rand::random::<f64>() < self.loss_rate
    }
}

impl<N: NetworkService> NetworkService for LossyNetwork<N> {
    type Error = N::Error;

    async fn send_to(&self, target: PeerId, frame: Bytes) -> Result<(), Self::Error> {
        if self.dropped() {
            return Ok(());
        }
        self.inner.send_to(target, frame).await
    }

    async fn broadcast(&self, frame: Bytes) -> Result<(), Self::Error> {
        if self.dropped() {
            return Ok(());
        }
        self.inner.broadcast(frame).await
    }
}
