//! The synchronization engine.
//!
//! A single-task cooperative event loop owns all sync state: the peer
//! table, the session table and the firewall. The network layer feeds
//! it [`Event`]s through the [`SynchronizerHandle`]; a periodic
//! heartbeat sweeps sessions, retries handshakes, announces our tip
//! and opens new sync sessions when we fall behind.

use async_channel::{Receiver, Sender};
use bytes::Bytes;
use futures::{pin_mut, select, FutureExt};
use futures_timer::Delay;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use tracing::{debug, info, trace, warn};

use crate::{
    bundle::{self, Bundle, BundleFlags},
    config::SyncConfig,
    error::{Error, Result},
    firewall::Firewall,
    handlers::{self, HandlerContext, Outbound},
    message::{handshake_sign_bytes, Heartbeat, Hello, Message},
    network::NetworkService,
    peer::{PeerFlags, PeerId, PeerStatus},
    peer_set::PeerSet,
    session::{SessionManager, SessionStatus},
    state::{Crypto, StateFacade},
};

/// Agent string announced in our handshake.
pub const AGENT: &str = concat!("blocksync/", env!("CARGO_PKG_VERSION"));

/// Input events consumed by the event loop.
#[derive(Debug)]
pub enum Event {
    /// A raw frame arrived from the network layer.
    Frame {
        /// Origin peer, as identified by the transport.
        from: PeerId,
        /// The undecoded frame.
        data: Bytes,
    },
    /// The transport reports a connection up.
    Connected(PeerId),
    /// The transport reports a connection gone.
    Disconnected(PeerId),
    /// The embedding node asks for a broadcast (e.g. a block announce
    /// after a local commit).
    Broadcast(Message),
    /// The embedding node asks for a unicast.
    SendTo(PeerId, Message),
}

/// Cloneable handle feeding a running [`Synchronizer`].
#[derive(Debug, Clone)]
pub struct SynchronizerHandle {
    events_tx: Sender<Event>,
    shutdown_tx: Sender<()>,
    shutdown: Arc<AtomicBool>,
    peers: Arc<PeerSet>,
}

impl SynchronizerHandle {
    /// Deliver an inbound frame, waiting when the loop is busy.
    pub async fn deliver(&self, from: PeerId, data: Bytes) -> Result<()> {
        self.events_tx.send(Event::Frame { from, data }).await?;
        Ok(())
    }

    /// Deliver an inbound frame, dropping it when the channel is full.
    ///
    /// Peers retransmit, so shedding load here is safe.
    pub fn try_deliver(&self, from: PeerId, data: Bytes) -> bool {
        self.events_tx.try_send(Event::Frame { from, data }).is_ok()
    }

    /// Report a peer connection coming up.
    pub async fn peer_connected(&self, pid: PeerId) -> Result<()> {
        self.events_tx.send(Event::Connected(pid)).await?;
        Ok(())
    }

    /// Report a peer connection going away.
    pub async fn peer_disconnected(&self, pid: PeerId) -> Result<()> {
        self.events_tx.send(Event::Disconnected(pid)).await?;
        Ok(())
    }

    /// Broadcast a message to all peers.
    pub async fn broadcast(&self, message: Message) -> Result<()> {
        self.events_tx.send(Event::Broadcast(message)).await?;
        Ok(())
    }

    /// Send a message to one peer.
    pub async fn send_to(&self, target: PeerId, message: Message) -> Result<()> {
        self.events_tx.send(Event::SendTo(target, message)).await?;
        Ok(())
    }

    /// Ask the loop to stop at the next event boundary.
    ///
    /// Open sessions are closed as `Uncompleted` on the way out.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.shutdown_tx.try_send(());
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Shared view of the peer table, for introspection and RPC.
    pub fn peer_set(&self) -> Arc<PeerSet> {
        Arc::clone(&self.peers)
    }
}

/// The synchronization engine.
///
/// Construct with [`Synchronizer::new`], then drive [`Synchronizer::run`]
/// on any executor. The loop exits when [`SynchronizerHandle::stop`] is
/// called, every handle is dropped, or a fatal error surfaces.
pub struct Synchronizer<S, N, C> {
    config: SyncConfig,
    local_id: PeerId,
    network_id: u8,
    peers: Arc<PeerSet>,
    sessions: SessionManager,
    firewall: Firewall,
    state: S,
    network: N,
    crypto: C,
    events_rx: Receiver<Event>,
    shutdown_rx: Receiver<()>,
    shutdown: Arc<AtomicBool>,
}

impl<S, N, C> Synchronizer<S, N, C>
where
    S: StateFacade,
    N: NetworkService,
    C: Crypto,
{
    /// Create a synchronizer and the handle that feeds it.
    pub fn new(
        config: SyncConfig,
        local_id: PeerId,
        network_id: u8,
        crypto: C,
        state: S,
        network: N,
    ) -> Result<(Self, SynchronizerHandle)> {
        config.validate()?;

        let (events_tx, events_rx) = async_channel::bounded(config.channel_capacity);
        let (shutdown_tx, shutdown_rx) = async_channel::bounded(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let peers = Arc::new(PeerSet::new(
            config.max_peers,
            config.max_invalids,
            config.ban_window,
        ));
        let firewall = Firewall::new(network_id, &config);
        let sessions = SessionManager::new(config.max_open_sessions);

        let handle = SynchronizerHandle {
            events_tx,
            shutdown_tx,
            shutdown: Arc::clone(&shutdown),
            peers: Arc::clone(&peers),
        };
        let synchronizer = Self {
            config,
            local_id,
            network_id,
            peers,
            sessions,
            firewall,
            state,
            network,
            crypto,
            events_rx,
            shutdown_rx,
            shutdown,
        };
        Ok((synchronizer, handle))
    }

    /// Shared view of the peer table.
    pub fn peer_set(&self) -> Arc<PeerSet> {
        Arc::clone(&self.peers)
    }

    /// Run the event loop until stopped.
    pub async fn run(mut self) -> Result<()> {
        info!(peer = %self.local_id, network = self.network_id, "synchronizer started");
        let events_rx = self.events_rx.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        let mut heartbeat = Delay::new(self.config.heartbeat_interval);

        let result = loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break Ok(());
            }
            select! {
                event = events_rx.recv().fuse() => match event {
                    Ok(event) => {
                        if let Err(e) = self.on_event(event).await {
                            if e.is_fatal() {
                                break Err(e);
                            }
                        }
                    }
                    // Every handle is gone; nothing can feed us anymore.
                    Err(_) => break Ok(()),
                },
                _ = (&mut heartbeat).fuse() => {
                    if let Err(e) = self.on_heartbeat().await {
                        if e.is_fatal() {
                            break Err(e);
                        }
                    }
                    heartbeat.reset(self.config.heartbeat_interval);
                }
                _ = shutdown_rx.recv().fuse() => break Ok(()),
            }
        };

        let closed = self.sessions.close_all();
        if !closed.is_empty() {
            info!(count = closed.len(), "closed open sessions on shutdown");
        }
        info!(peer = %self.local_id, "synchronizer stopped");
        result
    }

    async fn on_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Frame { from, data } => self.on_frame(from, data).await,
            Event::Connected(pid) => {
                if matches!(
                    self.peers.get_status(&pid),
                    PeerStatus::Unknown | PeerStatus::Disconnected
                ) {
                    self.peers.update_status(pid, PeerStatus::Connected);
                }
                Ok(())
            }
            Event::Disconnected(pid) => {
                if let Some(sid) = self.sessions.session_for_peer(&pid) {
                    warn!(peer = %pid, session = sid, "peer disconnected with open session");
                    self.sessions.close(sid, SessionStatus::Uncompleted);
                }
                if matches!(
                    self.peers.get_status(&pid),
                    PeerStatus::Connected | PeerStatus::Known
                ) {
                    self.peers.update_status(pid, PeerStatus::Disconnected);
                }
                Ok(())
            }
            Event::Broadcast(message) => self.send_outbound(Outbound::broadcast(message)).await,
            Event::SendTo(target, message) => {
                self.send_outbound(Outbound::to(target, message)).await
            }
        }
    }

    /// Admit, decode and dispatch one inbound frame.
    async fn on_frame(&mut self, from: PeerId, data: Bytes) -> Result<()> {
        let now = Instant::now();

        if let Err(reject) = self.firewall.allow_frame(&self.peers, from, data.len(), now) {
            trace!(peer = %from, %reject, "frame dropped by firewall");
            #[cfg(feature = "metrics")]
            crate::metrics::inc_frames_dropped();
            return Ok(());
        }

        let header = match bundle::peek_header(&data) {
            Ok(header) => header,
            Err(e) => {
                debug!(peer = %from, error = %e, "unparseable frame header");
                self.punish(from, now);
                return Ok(());
            }
        };
        // Foreign-network frames say nothing about the peer; drop them
        // without touching its record.
        if let Err(reject) = self.firewall.allow_header(&header) {
            trace!(peer = %from, %reject, "frame dropped by firewall");
            #[cfg(feature = "metrics")]
            crate::metrics::inc_frames_dropped();
            return Ok(());
        }

        self.peers.record_received(from, data.len());
        #[cfg(feature = "metrics")]
        crate::metrics::inc_frames_received(data.len());

        let bundle = match Bundle::decode(&data, self.config.max_frame_size) {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(peer = %from, error = %e, "dropping malformed bundle");
                self.punish(from, now);
                return Ok(());
            }
        };

        let message = bundle.message;
        trace!(peer = %from, message = message.name(), "dispatching message");
        let outbound = {
            let mut ctx = HandlerContext {
                config: &self.config,
                local_id: self.local_id,
                network_id: self.network_id,
                peers: &self.peers,
                sessions: &mut self.sessions,
                state: &self.state,
                crypto: &self.crypto,
                now,
            };
            handlers::dispatch(&mut ctx, from, message)
        };

        #[cfg(feature = "metrics")]
        crate::metrics::set_open_sessions(self.sessions.open_count());

        match outbound {
            Ok(out) => {
                for item in out {
                    self.send_outbound(item).await?;
                }
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(peer = %from, error = %e, "handler rejected message");
                self.punish(from, now);
                Ok(())
            }
        }
    }

    /// Periodic tick: sweep sessions, retry handshakes, announce the
    /// tip, and open a sync session when we lag.
    async fn on_heartbeat(&mut self) -> Result<()> {
        let now = Instant::now();

        for (sid, pid) in self.sessions.sweep(now, self.config.session_timeout) {
            warn!(session = sid, peer = %pid, "session timed out");
            self.peers.penalize(pid);
            #[cfg(feature = "metrics")]
            crate::metrics::inc_sessions_uncompleted();
        }

        for pid in self
            .peers
            .hello_candidates(now, self.config.hello_retry_interval)
        {
            let nonce = rand::random();
            self.peers.mark_hello_sent(pid, nonce, now);
            let hello = self.make_hello(nonce);
            debug!(peer = %pid, "sending hello");
            self.send_outbound(Outbound::to(pid, Message::Hello(hello)))
                .await?;
        }

        let local_height = self.state.last_block_height();
        self.send_outbound(Outbound::broadcast(Message::Heartbeat(Heartbeat {
            height: local_height,
            round: 0,
        })))
        .await?;

        self.try_open_session(local_height).await?;

        #[cfg(feature = "metrics")]
        {
            let stats = self.peers.stats();
            crate::metrics::set_known_peers(stats.known);
            crate::metrics::set_open_sessions(self.sessions.open_count());
            crate::metrics::set_last_block_height(local_height);
        }
        Ok(())
    }

    /// Open a block-range session against the best peer when the
    /// network is ahead of us by more than the trigger delta.
    async fn try_open_session(&mut self, local_height: u32) -> Result<()> {
        let best_height = self.peers.best_known_height();
        if best_height <= local_height.saturating_add(self.config.sync_trigger_delta) {
            return Ok(());
        }
        let from = local_height + 1;
        let Some(pid) = self.peers.best_peer_above(from) else {
            return Ok(());
        };
        if self.sessions.has_open_session(&pid) {
            return Ok(());
        }
        let Some(peer) = self.peers.get(&pid) else {
            return Ok(());
        };
        let count = (peer.claimed_height - local_height).min(self.config.latest_block_interval);

        let sid = match self.sessions.open(pid, from, count) {
            Ok(sid) => sid,
            Err(e) => {
                debug!(peer = %pid, error = %e, "cannot open session");
                return Ok(());
            }
        };
        info!(
            session = sid,
            peer = %pid,
            from,
            count,
            behind = best_height - local_height,
            "opening sync session"
        );
        #[cfg(feature = "metrics")]
        crate::metrics::inc_sessions_opened();

        self.send_outbound(Outbound::to(
            pid,
            Message::BlocksRequest(crate::message::BlocksRequest {
                session_id: sid,
                from,
                count,
            }),
        ))
        .await
    }

    /// Wrap an outbound message in a bundle and hand it to the network
    /// layer, dropping it if the queue stays full past the deadline.
    async fn send_outbound(&self, out: Outbound) -> Result<()> {
        let mut flags = out.flags;
        if out.target.is_none() {
            flags = flags.with(BundleFlags::BROADCAST);
        }
        let bundle = Bundle::new(self.network_id, out.message).with_flags(flags);
        let frame = bundle.encode(self.config.compression_min_size);

        let send = async {
            match out.target {
                Some(pid) => self
                    .network
                    .send_to(pid, frame)
                    .await
                    .map_err(|e| Error::Transient(e.to_string())),
                None => self
                    .network
                    .broadcast(frame)
                    .await
                    .map_err(|e| Error::Transient(e.to_string())),
            }
        }
        .fuse();
        let deadline = Delay::new(self.config.outbound_send_timeout).fuse();
        pin_mut!(send, deadline);

        select! {
            result = send => {
                if let Err(e) = result {
                    warn!(error = %e, "network send failed");
                }
            }
            _ = deadline => {
                warn!(target = ?out.target, "outbound queue full, dropping bundle");
                #[cfg(feature = "metrics")]
                crate::metrics::inc_frames_dropped();
            }
        }
        #[cfg(feature = "metrics")]
        crate::metrics::inc_frames_sent();
        Ok(())
    }

    /// Count a protocol violation and ban the peer when it crosses the
    /// threshold. A ban also abandons the peer's open session, if any.
    fn punish(&mut self, pid: PeerId, now: Instant) {
        #[cfg(feature = "metrics")]
        crate::metrics::inc_invalid_messages();
        if self.peers.increment_invalid(pid, now) {
            warn!(peer = %pid, "peer banned");
            if let Some(sid) = self.sessions.session_for_peer(&pid) {
                self.sessions.close(sid, SessionStatus::Uncompleted);
            }
        }
    }

    /// Our handshake announcement for the current tip.
    fn make_hello(&self, nonce: u64) -> Hello {
        let height = self.state.last_block_height();
        let sign_bytes = handshake_sign_bytes(self.network_id, &self.local_id, height, nonce);
        let flags = if self.config.node_network {
            PeerFlags::FULL_NODE
        } else {
            PeerFlags::default()
        };
        Hello {
            peer_id: self.local_id,
            network_id: self.network_id,
            moniker: self.config.moniker.clone(),
            agent: AGENT.to_string(),
            height,
            flags,
            public_key: self.crypto.public_key(),
            signature: self.crypto.sign(&sign_bytes),
            nonce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        network::NoopNetwork,
        testing::{MockCrypto, MockState},
    };

    fn new_node() -> (
        Synchronizer<MockState, NoopNetwork, MockCrypto>,
        SynchronizerHandle,
    ) {
        Synchronizer::new(
            SyncConfig::lan(),
            PeerId::from_bytes([1; 32]),
            7,
            MockCrypto::new(1),
            MockState::new(),
            NoopNetwork,
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = SyncConfig::default().with_block_per_message(0);
        let result = Synchronizer::new(
            config,
            PeerId::from_bytes([1; 32]),
            7,
            MockCrypto::new(1),
            MockState::new(),
            NoopNetwork,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stop_terminates_loop() {
        let (node, handle) = new_node();
        let task = tokio::spawn(node.run());
        handle.stop();
        task.await.unwrap().unwrap();
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_loop_exits_when_handles_dropped() {
        let (node, handle) = new_node();
        let task = tokio::spawn(node.run());
        drop(handle);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connected_event_promotes_peer() {
        let (node, handle) = new_node();
        let peers = node.peer_set();
        let task = tokio::spawn(node.run());

        let pid = PeerId::from_bytes([9; 32]);
        handle.peer_connected(pid).await.unwrap();

        // The loop consumes events asynchronously; poll briefly.
        for _ in 0..50 {
            if peers.get_status(&pid) == PeerStatus::Connected {
                break;
            }
            Delay::new(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(peers.get_status(&pid), PeerStatus::Connected);

        handle.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frames_ban_peer() {
        let (node, handle) = new_node();
        let peers = node.peer_set();
        let task = tokio::spawn(node.run());

        let pid = PeerId::from_bytes([9; 32]);
        handle.peer_connected(pid).await.unwrap();
        // max_invalids = 10: the eleventh malformed frame bans.
        for _ in 0..11 {
            handle
                .deliver(pid, Bytes::from_static(b"\x01\x00\x00\x07garbage"))
                .await
                .unwrap();
        }

        for _ in 0..100 {
            if peers.get_status(&pid) == PeerStatus::Banned {
                break;
            }
            Delay::new(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(peers.get_status(&pid), PeerStatus::Banned);

        handle.stop();
        task.await.unwrap().unwrap();
    }
}
