//! Inbound admission control.
//!
//! The firewall sits in front of the decoder: banned origins, foreign
//! networks, oversized frames and rate-limit violations are dropped
//! before any payload work is done, and none of them move peer state.
//!
//! Rate limiting is a per-peer virtual deadline (GCRA style): each
//! admitted frame pushes the peer's `next_free` instant forward by the
//! per-frame cost, and a frame is rejected once that deadline runs
//! further ahead of the clock than the configured burst allows. This
//! needs one `Instant` per peer and no floating-point bookkeeping.

use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt,
    time::{Duration, Instant},
};

use crate::{
    bundle::BundleHeader,
    config::SyncConfig,
    peer::PeerId,
    peer_set::PeerSet,
};

/// Why the firewall dropped a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallReject {
    /// The origin peer is banned.
    Banned,
    /// The raw frame exceeds the frame-size cap.
    Oversized,
    /// The origin exhausted its rate allowance.
    RateLimited,
    /// The frame belongs to a different network.
    ForeignNetwork,
}

impl fmt::Display for FirewallReject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FirewallReject::Banned => "origin is banned",
            FirewallReject::Oversized => "frame exceeds size cap",
            FirewallReject::RateLimited => "origin is rate limited",
            FirewallReject::ForeignNetwork => "frame from a foreign network",
        };
        f.write_str(s)
    }
}

/// Admission control for inbound frames.
#[derive(Debug)]
pub struct Firewall {
    network_id: u8,
    max_frame_size: usize,
    /// Time credit one admitted frame costs; zero disables the limit.
    frame_cost: Duration,
    /// How far a peer's deadline may run ahead of the clock. Equals
    /// `frame_cost * (burst - 1)`, so exactly `burst` frames pass
    /// back-to-back from a cold start.
    burst_allowance: Duration,
    /// Per-peer deadlines. Bounded alongside the peer table: a meter
    /// whose deadline is in the past grants the same full burst as a
    /// fresh one, so such entries are dropped when the table fills.
    meters: Mutex<HashMap<PeerId, Instant>>,
    max_meters: usize,
}

impl Firewall {
    /// Create a firewall for the local network id.
    pub fn new(network_id: u8, config: &SyncConfig) -> Self {
        let frame_cost = if config.rate_limit_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / config.rate_limit_per_second)
        } else {
            Duration::ZERO
        };
        let burst_allowance = frame_cost * config.rate_limit_burst.saturating_sub(1);
        Self {
            network_id,
            max_frame_size: config.max_frame_size,
            frame_cost,
            burst_allowance,
            meters: Mutex::new(HashMap::new()),
            max_meters: config.max_peers,
        }
    }

    /// Admit or reject a raw frame from `pid` before it is decoded.
    pub fn allow_frame(
        &self,
        peers: &PeerSet,
        pid: PeerId,
        frame_len: usize,
        now: Instant,
    ) -> Result<(), FirewallReject> {
        if peers.is_banned(&pid, now) {
            return Err(FirewallReject::Banned);
        }
        if frame_len > self.max_frame_size {
            return Err(FirewallReject::Oversized);
        }
        if !self.admit(pid, now) {
            return Err(FirewallReject::RateLimited);
        }
        Ok(())
    }

    /// Admit or reject a parsed header.
    ///
    /// A foreign-network frame is dropped without touching peer state;
    /// the neighbour is merely on the wrong network, not hostile.
    pub fn allow_header(&self, header: &BundleHeader) -> Result<(), FirewallReject> {
        if header.network_id != self.network_id {
            return Err(FirewallReject::ForeignNetwork);
        }
        Ok(())
    }

    /// Charge one frame against the peer's deadline.
    fn admit(&self, pid: PeerId, now: Instant) -> bool {
        if self.frame_cost.is_zero() {
            return true;
        }
        let mut meters = self.meters.lock();
        if meters.len() >= self.max_meters {
            meters.retain(|_, next_free| *next_free > now);
        }

        let next_free = meters.entry(pid).or_insert(now);
        if *next_free > now + self.burst_allowance {
            return false;
        }
        // An idle peer's deadline lags the clock; it pays from now, not
        // from the stale deadline, so idleness never accrues extra
        // credit beyond the burst.
        let base = if *next_free > now { *next_free } else { now };
        *next_free = base + self.frame_cost;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleFlags;

    fn pid(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    fn firewall(config: &SyncConfig) -> (Firewall, PeerSet) {
        (
            Firewall::new(7, config),
            PeerSet::new(
                config.max_peers,
                config.max_invalids,
                config.ban_window,
            ),
        )
    }

    #[test]
    fn test_oversized_frame_dropped() {
        let config = SyncConfig::default().with_max_frame_size(100);
        let (fw, peers) = firewall(&config);
        let now = Instant::now();
        assert_eq!(
            fw.allow_frame(&peers, pid(1), 101, now),
            Err(FirewallReject::Oversized)
        );
        assert!(fw.allow_frame(&peers, pid(1), 100, now).is_ok());
    }

    #[test]
    fn test_banned_peer_dropped() {
        let config = SyncConfig::default().with_max_invalids(0);
        let (fw, peers) = firewall(&config);
        let now = Instant::now();
        peers.increment_invalid(pid(1), now);
        assert_eq!(
            fw.allow_frame(&peers, pid(1), 10, now),
            Err(FirewallReject::Banned)
        );
    }

    #[test]
    fn test_rate_limit_allows_burst_then_drops() {
        let config = SyncConfig::default().with_rate_limit(1.0, 3);
        let (fw, peers) = firewall(&config);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(fw.allow_frame(&peers, pid(1), 10, now).is_ok());
        }
        assert_eq!(
            fw.allow_frame(&peers, pid(1), 10, now),
            Err(FirewallReject::RateLimited)
        );
        // Another peer has its own allowance.
        assert!(fw.allow_frame(&peers, pid(2), 10, now).is_ok());
        // The deadline drains with time.
        let later = now + Duration::from_secs(2);
        assert!(fw.allow_frame(&peers, pid(1), 10, later).is_ok());
    }

    #[test]
    fn test_idleness_never_exceeds_burst() {
        let config = SyncConfig::default().with_rate_limit(1.0, 2);
        let (fw, peers) = firewall(&config);
        let now = Instant::now();
        // A long-idle peer still gets only the burst, not banked credit.
        let later = now + Duration::from_secs(3600);
        assert!(fw.allow_frame(&peers, pid(1), 10, later).is_ok());
        assert!(fw.allow_frame(&peers, pid(1), 10, later).is_ok());
        assert_eq!(
            fw.allow_frame(&peers, pid(1), 10, later),
            Err(FirewallReject::RateLimited)
        );
    }

    #[test]
    fn test_zero_rate_disables_limit() {
        let config = SyncConfig::default().with_rate_limit(0.0, 0);
        let (fw, peers) = firewall(&config);
        let now = Instant::now();
        for _ in 0..1000 {
            assert!(fw.allow_frame(&peers, pid(1), 10, now).is_ok());
        }
    }

    #[test]
    fn test_idle_meters_pruned_when_full() {
        let mut config = SyncConfig::default().with_rate_limit(1000.0, 10);
        config.max_peers = 2;
        let (fw, peers) = firewall(&config);
        let now = Instant::now();
        assert!(fw.allow_frame(&peers, pid(1), 10, now).is_ok());
        assert!(fw.allow_frame(&peers, pid(2), 10, now).is_ok());
        // Once both deadlines lapse, a third peer evicts them instead
        // of growing the table.
        let later = now + Duration::from_secs(1);
        assert!(fw.allow_frame(&peers, pid(3), 10, later).is_ok());
        assert!(fw.meters.lock().len() <= 2);
    }

    #[test]
    fn test_foreign_network_dropped() {
        let config = SyncConfig::default();
        let (fw, _) = firewall(&config);
        let header = BundleHeader {
            version: 1,
            flags: BundleFlags::default(),
            network_id: 8,
            payload_len: 0,
        };
        assert_eq!(
            fw.allow_header(&header),
            Err(FirewallReject::ForeignNetwork)
        );
        let local = BundleHeader {
            network_id: 7,
            ..header
        };
        assert!(fw.allow_header(&local).is_ok());
    }
}
