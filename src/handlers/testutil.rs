//! Shared fixture for handler unit tests.

use std::time::Instant;

use super::{dispatch, HandlerContext, Outbound};
use crate::{
    config::SyncConfig,
    error::{Error, Result},
    message::{handshake_sign_bytes, HandshakeCode, Hello, HelloAck, Message},
    peer::{PeerFlags, PeerId, PeerStatus},
    peer_set::PeerSet,
    session::SessionManager,
    state::Crypto,
    testing::{MockCrypto, MockState},
};

pub(crate) use crate::testing::{test_block, test_certificate};

/// A synchronizer's worth of state, minus the loop.
pub(crate) struct Env {
    pub config: SyncConfig,
    pub local_id: PeerId,
    pub network_id: u8,
    pub peers: PeerSet,
    pub sessions: SessionManager,
    pub state: MockState,
    pub crypto: MockCrypto,
    pub peer_crypto: MockCrypto,
}

impl Env {
    pub fn new() -> Self {
        Self::with_state(SyncConfig::default(), MockState::new())
    }

    pub fn with_height(height: u32) -> Self {
        Self::with_state(SyncConfig::default(), MockState::with_blocks(height))
    }

    pub fn archival_with_height(height: u32) -> Self {
        Self::with_state(SyncConfig::archival(), MockState::with_blocks(height))
    }

    fn with_state(config: SyncConfig, state: MockState) -> Self {
        let peers = PeerSet::new(config.max_peers, config.max_invalids, config.ban_window);
        let sessions = SessionManager::new(config.max_open_sessions);
        Self {
            config,
            local_id: PeerId::from_bytes([1; 32]),
            network_id: 7,
            peers,
            sessions,
            state,
            crypto: MockCrypto::new(1),
            peer_crypto: MockCrypto::new(2),
        }
    }

    pub fn dispatch(&mut self, from: PeerId, message: Message) -> Result<Vec<Outbound>> {
        let mut ctx = HandlerContext {
            config: &self.config,
            local_id: self.local_id,
            network_id: self.network_id,
            peers: &self.peers,
            sessions: &mut self.sessions,
            state: &self.state,
            crypto: &self.crypto,
            now: Instant::now(),
        };
        dispatch(&mut ctx, from, message)
    }

    pub fn dispatch_ok(&mut self, from: PeerId, message: Message) -> Vec<Outbound> {
        self.dispatch(from, message).expect("handler should accept")
    }

    pub fn dispatch_err(&mut self, from: PeerId, message: Message) -> Error {
        self.dispatch(from, message)
            .expect_err("handler should reject")
    }

    /// A well-signed hello as the remote peer would send it.
    pub fn make_peer_hello(&self, peer_id: PeerId, height: u32, nonce: u64) -> Hello {
        let sign = handshake_sign_bytes(self.network_id, &peer_id, height, nonce);
        Hello {
            peer_id,
            network_id: self.network_id,
            moniker: "peer".into(),
            agent: "test-agent/1.0".into(),
            height,
            flags: PeerFlags::FULL_NODE,
            public_key: self.peer_crypto.public_key(),
            signature: self.peer_crypto.sign(&sign),
            nonce,
        }
    }

    /// A well-signed hello-ack as the remote peer would send it.
    pub fn make_peer_ack(&self, peer_id: PeerId, height: u32, nonce: u64) -> HelloAck {
        let sign = handshake_sign_bytes(self.network_id, &peer_id, height, nonce);
        HelloAck {
            code: HandshakeCode::Ok,
            reason: String::new(),
            peer_id,
            height,
            public_key: self.peer_crypto.public_key(),
            signature: self.peer_crypto.sign(&sign),
            nonce,
        }
    }

    /// Promote a peer straight to `Known` with a claimed height.
    pub fn make_known(&self, pid: PeerId, height: u32) {
        self.peers.update_status(pid, PeerStatus::Connected);
        self.peers.update_status(pid, PeerStatus::Known);
        self.peers.update_claimed_height(pid, height);
    }
}
