//! Peer table: status tracking, handshake claims, scoring and selection.
//!
//! All mutations are serialized through a single lock. The event loop is
//! the only writer in production; other tasks may take read snapshots.

use parking_lot::RwLock;
use std::time::{Duration, Instant};

use crate::peer::{Peer, PeerFlags, PeerId, PeerStatus, PublicKey};

/// Result of a status transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// The transition was applied.
    Changed,
    /// The peer was already in the requested status.
    Unchanged,
    /// The requested edge is not in the allowed graph; state untouched.
    ///
    /// This indicates a programming error in the caller.
    InvalidTransition,
}

/// Aggregate counters over the peer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerSetStats {
    /// Total records retained.
    pub total: usize,
    /// Peers that completed the handshake.
    pub known: usize,
    /// Peers connected but not yet handshaked.
    pub connected: usize,
    /// Currently banned peers.
    pub banned: usize,
}

/// Thread-safe mapping from peer ID to peer record.
#[derive(Debug)]
pub struct PeerSet {
    peers: RwLock<Vec<Peer>>,
    max_peers: usize,
    max_invalids: u32,
    ban_window: Duration,
}

impl PeerSet {
    /// Create an empty peer table.
    ///
    /// # Arguments
    ///
    /// - `max_peers`: bound on retained records; disconnected records are
    ///   evicted oldest-first when the bound is hit
    /// - `max_invalids`: violations tolerated inside `ban_window`
    /// - `ban_window`: violation counting window, also the ban TTL
    pub fn new(max_peers: usize, max_invalids: u32, ban_window: Duration) -> Self {
        Self {
            peers: RwLock::new(Vec::new()),
            max_peers,
            max_invalids,
            ban_window,
        }
    }

    /// Look up a snapshot of a peer record.
    pub fn get(&self, pid: &PeerId) -> Option<Peer> {
        self.peers.read().iter().find(|p| p.peer_id == *pid).cloned()
    }

    /// Current status of a peer; absent peers are `Unknown`.
    pub fn get_status(&self, pid: &PeerId) -> PeerStatus {
        self.peers
            .read()
            .iter()
            .find(|p| p.peer_id == *pid)
            .map(|p| p.status)
            .unwrap_or(PeerStatus::Unknown)
    }

    /// Record an inbound bundle: bump the receive counters, creating the
    /// record on first contact.
    pub fn record_received(&self, pid: PeerId, bytes: usize) {
        let mut peers = self.peers.write();
        let peer = Self::entry(&mut peers, pid, self.max_peers);
        peer.received_messages += 1;
        peer.received_bytes += bytes as u64;
        peer.last_seen = Instant::now();
    }

    /// Apply a status transition, creating the record on demand.
    ///
    /// Transitions outside the allowed graph are programming errors: they
    /// are rejected, logged, and leave the record untouched.
    pub fn update_status(&self, pid: PeerId, next: PeerStatus) -> StatusChange {
        let mut peers = self.peers.write();
        let peer = Self::entry(&mut peers, pid, self.max_peers);
        if peer.status == next {
            return StatusChange::Unchanged;
        }
        if !peer.status.can_transition_to(next) {
            tracing::error!(
                peer = %pid,
                from = %peer.status,
                to = %next,
                "invalid peer status transition"
            );
            return StatusChange::InvalidTransition;
        }
        tracing::debug!(peer = %pid, from = %peer.status, to = %next, "peer status changed");
        peer.status = next;
        if next == PeerStatus::Banned {
            peer.banned_until = Some(Instant::now() + self.ban_window);
        }
        StatusChange::Changed
    }

    /// Update the claims a peer announced in its handshake.
    pub fn update_claim(
        &self,
        pid: PeerId,
        height: u32,
        public_key: PublicKey,
        agent: String,
        moniker: String,
        flags: PeerFlags,
    ) {
        let mut peers = self.peers.write();
        let peer = Self::entry(&mut peers, pid, self.max_peers);
        peer.claimed_height = height;
        peer.public_key = Some(public_key);
        peer.agent = agent;
        peer.moniker = moniker;
        peer.flags = flags;
    }

    /// Record the claims learned from a handshake confirmation.
    ///
    /// An ack carries no moniker or agent, so only the key and height
    /// are touched.
    pub fn record_handshake(&self, pid: PeerId, height: u32, public_key: PublicKey) {
        let mut peers = self.peers.write();
        let peer = Self::entry(&mut peers, pid, self.max_peers);
        peer.claimed_height = height;
        peer.public_key = Some(public_key);
    }

    /// Update only the claimed height (heartbeat and block announces).
    ///
    /// Heights never move backwards; a stale announce is ignored.
    pub fn update_claimed_height(&self, pid: PeerId, height: u32) {
        let mut peers = self.peers.write();
        let peer = Self::entry(&mut peers, pid, self.max_peers);
        if height > peer.claimed_height {
            peer.claimed_height = height;
        }
    }

    /// Count a protocol violation against a peer.
    ///
    /// Violations are counted inside a sliding window of `ban_window`;
    /// exceeding `max_invalids` inside one window bans the peer. Returns
    /// `true` when this call caused the ban.
    pub fn increment_invalid(&self, pid: PeerId, now: Instant) -> bool {
        let mut peers = self.peers.write();
        let peer = Self::entry(&mut peers, pid, self.max_peers);

        match peer.invalid_window_start {
            Some(start) if now.duration_since(start) <= self.ban_window => {
                peer.invalid_messages += 1;
            }
            _ => {
                peer.invalid_window_start = Some(now);
                peer.invalid_messages = 1;
            }
        }

        if peer.invalid_messages > self.max_invalids && peer.status != PeerStatus::Banned {
            tracing::warn!(
                peer = %pid,
                invalids = peer.invalid_messages,
                "peer exceeded invalid-message threshold, banning"
            );
            peer.status = PeerStatus::Banned;
            peer.banned_until = Some(now + self.ban_window);
            return true;
        }
        false
    }

    /// Count a failed session against a peer.
    ///
    /// A light penalty: it demotes the peer in selection but never bans.
    pub fn penalize(&self, pid: PeerId) {
        let mut peers = self.peers.write();
        let peer = Self::entry(&mut peers, pid, self.max_peers);
        peer.session_failures += 1;
    }

    /// Whether the peer is banned at `now`.
    ///
    /// A ban whose TTL has passed is cleared to `Disconnected` on this
    /// touch, letting the peer reconnect.
    pub fn is_banned(&self, pid: &PeerId, now: Instant) -> bool {
        let mut peers = self.peers.write();
        let Some(peer) = peers.iter_mut().find(|p| p.peer_id == *pid) else {
            return false;
        };
        if peer.status != PeerStatus::Banned {
            return false;
        }
        match peer.banned_until {
            Some(deadline) if now >= deadline => {
                tracing::info!(peer = %pid, "ban expired");
                peer.status = PeerStatus::Disconnected;
                peer.banned_until = None;
                peer.invalid_messages = 0;
                peer.invalid_window_start = None;
                false
            }
            _ => true,
        }
    }

    /// Operator override: lift a ban immediately.
    pub fn unban(&self, pid: &PeerId) {
        let mut peers = self.peers.write();
        if let Some(peer) = peers.iter_mut().find(|p| p.peer_id == *pid) {
            if peer.status == PeerStatus::Banned {
                peer.status = PeerStatus::Disconnected;
                peer.banned_until = None;
                peer.invalid_messages = 0;
                peer.invalid_window_start = None;
            }
        }
    }

    /// Choose the best handshaked peer claiming at least `height`.
    ///
    /// Highest claimed height wins; ties break to the fewest protocol
    /// violations, then the fewest session failures, then the lowest
    /// peer ID.
    pub fn best_peer_above(&self, height: u32) -> Option<PeerId> {
        let peers = self.peers.read();
        peers
            .iter()
            .filter(|p| p.status.is_known() && p.claimed_height >= height)
            .min_by(|a, b| {
                b.claimed_height
                    .cmp(&a.claimed_height)
                    .then(a.invalid_messages.cmp(&b.invalid_messages))
                    .then(a.session_failures.cmp(&b.session_failures))
                    .then(a.peer_id.cmp(&b.peer_id))
            })
            .map(|p| p.peer_id)
    }

    /// Highest block height claimed by any handshaked peer.
    pub fn best_known_height(&self) -> u32 {
        self.peers
            .read()
            .iter()
            .filter(|p| p.status.is_known())
            .map(|p| p.claimed_height)
            .max()
            .unwrap_or(0)
    }

    /// Connected peers due for a handshake attempt.
    pub fn hello_candidates(&self, now: Instant, retry_interval: Duration) -> Vec<PeerId> {
        self.peers
            .read()
            .iter()
            .filter(|p| p.status == PeerStatus::Connected)
            .filter(|p| match p.last_hello_sent {
                Some(sent) => now.duration_since(sent) >= retry_interval,
                None => true,
            })
            .map(|p| p.peer_id)
            .collect()
    }

    /// Remember the nonce of a hello we just sent to `pid`.
    pub fn mark_hello_sent(&self, pid: PeerId, nonce: u64, now: Instant) {
        let mut peers = self.peers.write();
        let peer = Self::entry(&mut peers, pid, self.max_peers);
        peer.last_hello_sent = Some(now);
        peer.hello_nonce = Some(nonce);
    }

    /// Take the nonce of the last hello sent to `pid`, if any.
    pub fn take_hello_nonce(&self, pid: &PeerId) -> Option<u64> {
        let mut peers = self.peers.write();
        peers
            .iter_mut()
            .find(|p| p.peer_id == *pid)
            .and_then(|p| p.hello_nonce.take())
    }

    /// Aggregate counters over the table.
    pub fn stats(&self) -> PeerSetStats {
        let peers = self.peers.read();
        let mut stats = PeerSetStats {
            total: peers.len(),
            ..PeerSetStats::default()
        };
        for peer in peers.iter() {
            match peer.status {
                PeerStatus::Known => stats.known += 1,
                PeerStatus::Connected => stats.connected += 1,
                PeerStatus::Banned => stats.banned += 1,
                _ => {}
            }
        }
        stats
    }

    /// Find or create the record for `pid`, evicting if the table is full.
    fn entry(peers: &mut Vec<Peer>, pid: PeerId, max_peers: usize) -> &mut Peer {
        if let Some(idx) = peers.iter().position(|p| p.peer_id == pid) {
            return &mut peers[idx];
        }
        if peers.len() >= max_peers {
            // Keep scoring continuity for live peers: only disconnected
            // records are evictable, oldest first.
            let victim = peers
                .iter()
                .enumerate()
                .filter(|(_, p)| p.status == PeerStatus::Disconnected)
                .min_by_key(|(_, p)| p.last_seen)
                .map(|(idx, _)| idx);
            match victim {
                Some(idx) => {
                    peers.swap_remove(idx);
                }
                None => {
                    // Table full of live peers; reuse the oldest record
                    // rather than growing without bound.
                    let idx = peers
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, p)| p.last_seen)
                        .map(|(idx, _)| idx)
                        .unwrap_or(0);
                    peers.swap_remove(idx);
                }
            }
        }
        peers.push(Peer::new(pid));
        let idx = peers.len() - 1;
        &mut peers[idx]
    }
}
