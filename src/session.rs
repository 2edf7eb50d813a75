//! Client-side session records for outstanding block-range requests.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::{
    error::{Error, Result},
    peer::PeerId,
};

/// Final or in-flight state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Request sent, responses still expected.
    Open,
    /// The peer finished the range or reported us synced.
    Completed,
    /// Timed out, rejected, or failed mid-stream.
    Uncompleted,
}

/// A single outstanding block-range request.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique identifier, echoed by the serving peer.
    pub id: u32,
    /// The peer serving this session.
    pub peer: PeerId,
    /// First height requested.
    pub from: u32,
    /// Number of blocks requested.
    pub count: u32,
    /// Last time a response arrived for this session.
    pub last_activity: Instant,
    /// Current status.
    pub status: SessionStatus,
}

/// Table of open sessions, keyed by session ID.
///
/// IDs come from a monotonic counter and are unique over the node's
/// lifetime. The table only holds `Open` sessions; closing removes the
/// record and returns it to the caller.
#[derive(Debug)]
pub struct SessionManager {
    sessions: HashMap<u32, Session>,
    next_id: u32,
    max_open: usize,
}

impl SessionManager {
    /// Create an empty session table bounded at `max_open` live sessions.
    pub fn new(max_open: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: 0,
            max_open,
        }
    }

    /// Open a session against `peer` for `count` blocks starting at `from`.
    ///
    /// Refuses when the table is full or the peer already has an open
    /// session.
    pub fn open(&mut self, peer: PeerId, from: u32, count: u32) -> Result<u32> {
        if self.sessions.len() >= self.max_open {
            return Err(Error::ResourceExhausted {
                resource: "session table",
                limit: self.max_open,
            });
        }
        if self.has_open_session(&peer) {
            return Err(Error::ProtocolViolation(format!(
                "peer {} already has an open session",
                peer
            )));
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.sessions.insert(
            id,
            Session {
                id,
                peer,
                from,
                count,
                last_activity: Instant::now(),
                status: SessionStatus::Open,
            },
        );
        Ok(id)
    }

    /// Look up an open session.
    pub fn get(&self, id: u32) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Refresh a session's activity timestamp. Returns `false` when the
    /// session is not open.
    pub fn touch(&mut self, id: u32) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Close a session with its final status, removing it from the table.
    pub fn close(&mut self, id: u32, status: SessionStatus) -> Option<Session> {
        debug_assert_ne!(status, SessionStatus::Open);
        let mut session = self.sessions.remove(&id)?;
        session.status = status;
        Some(session)
    }

    /// Sweep sessions silent for longer than `timeout`.
    ///
    /// Swept sessions are closed as `Uncompleted`; the `(id, peer)` pairs
    /// are returned so the caller can penalize the peers.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<(u32, PeerId)> {
        let expired: Vec<u32> = self
            .sessions
            .values()
            .filter(|s| now.duration_since(s.last_activity) > timeout)
            .map(|s| s.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| {
                self.close(id, SessionStatus::Uncompleted)
                    .map(|s| (id, s.peer))
            })
            .collect()
    }

    /// Close every open session as `Uncompleted` (shutdown path).
    pub fn close_all(&mut self) -> Vec<Session> {
        let ids: Vec<u32> = self.sessions.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.close(id, SessionStatus::Uncompleted))
            .collect()
    }

    /// Whether `peer` has an open session.
    pub fn has_open_session(&self, peer: &PeerId) -> bool {
        self.sessions.values().any(|s| s.peer == *peer)
    }

    /// ID of the open session served by `peer`, if any.
    pub fn session_for_peer(&self, peer: &PeerId) -> Option<u32> {
        self.sessions.values().find(|s| s.peer == *peer).map(|s| s.id)
    }

    /// Number of open sessions.
    pub fn open_count(&self) -> usize {
        self.sessions.len()
    }
}
