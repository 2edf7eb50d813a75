//! Fuzz the peer table with arbitrary operation sequences.
//!
//! Whatever order transitions, violations and selections arrive in,
//! the table must never panic, the status graph must hold, and the
//! stats must stay consistent.

#![no_main]

use std::time::{Duration, Instant};

use blocksync::{PeerId, PeerSet, PeerStatus};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let set = PeerSet::new(16, 3, Duration::from_secs(60));
    let now = Instant::now();

    for chunk in data.chunks(2) {
        let pid = PeerId::from_bytes([chunk[0] % 8; 32]);
        let op = chunk.get(1).copied().unwrap_or(0);
        match op % 8 {
            0 => {
                set.update_status(pid, PeerStatus::Connected);
            }
            1 => {
                set.update_status(pid, PeerStatus::Known);
            }
            2 => {
                set.update_status(pid, PeerStatus::Disconnected);
            }
            3 => {
                set.update_status(pid, PeerStatus::Banned);
            }
            4 => {
                set.increment_invalid(pid, now);
            }
            5 => {
                set.update_claimed_height(pid, op as u32 * 7);
            }
            6 => {
                set.penalize(pid);
            }
            _ => {
                set.record_received(pid, op as usize);
            }
        }

        // A selected peer is always handshaked and tall enough.
        if let Some(best) = set.best_peer_above(op as u32) {
            let peer = set.get(&best).expect("selected peer must exist");
            assert_eq!(peer.status, PeerStatus::Known);
            assert!(peer.claimed_height >= op as u32);
        }
    }

    let stats = set.stats();
    assert!(stats.total <= 16);
    assert!(stats.known + stats.connected + stats.banned <= stats.total);
});
