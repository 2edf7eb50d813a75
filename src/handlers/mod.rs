//! Message handlers.
//!
//! One module per message kind. Handlers are plain functions: they take
//! the dispatch context by reference, validate preconditions, mutate
//! peer-set and session state, and return the outbound messages to
//! emit. All I/O stays in the event loop, so a long range read yields
//! between chunks when the responses are sent.

mod block_announce;
mod blocks_request;
mod blocks_response;
mod heartbeat;
mod hello;
mod hello_ack;

#[cfg(test)]
pub(crate) mod testutil;

use std::time::Instant;

use crate::{
    bundle::BundleFlags,
    config::SyncConfig,
    error::Result,
    message::Message,
    peer::PeerId,
    peer_set::PeerSet,
    session::SessionManager,
    state::{Crypto, StateFacade},
};

/// Everything a handler may read or mutate, passed per call.
pub(crate) struct HandlerContext<'a> {
    pub config: &'a SyncConfig,
    pub local_id: PeerId,
    pub network_id: u8,
    pub peers: &'a PeerSet,
    pub sessions: &'a mut SessionManager,
    pub state: &'a dyn StateFacade,
    pub crypto: &'a dyn Crypto,
    pub now: Instant,
}

/// An outbound message produced by a handler.
#[derive(Debug)]
pub(crate) struct Outbound {
    /// Addressed peer; `None` broadcasts.
    pub target: Option<PeerId>,
    /// The message to wrap and send.
    pub message: Message,
    /// Extra envelope flags beyond the defaults.
    pub flags: BundleFlags,
}

impl Outbound {
    /// Unicast `message` to `target`.
    pub fn to(target: PeerId, message: Message) -> Self {
        Self {
            target: Some(target),
            message,
            flags: BundleFlags::default(),
        }
    }

    /// Broadcast `message` to all peers.
    pub fn broadcast(message: Message) -> Self {
        Self {
            target: None,
            message,
            flags: BundleFlags::default(),
        }
    }

    /// Add envelope flags (builder pattern).
    pub fn with_flags(mut self, flags: BundleFlags) -> Self {
        self.flags = self.flags.with(flags);
        self
    }
}

/// Route a decoded message to its handler.
///
/// An `Err` marks the message as a protocol violation; the loop
/// penalizes the origin and carries on.
pub(crate) fn dispatch(
    ctx: &mut HandlerContext<'_>,
    from: PeerId,
    message: Message,
) -> Result<Vec<Outbound>> {
    match message {
        Message::Hello(msg) => hello::handle(ctx, from, msg),
        Message::HelloAck(msg) => hello_ack::handle(ctx, from, msg),
        Message::BlocksRequest(msg) => blocks_request::handle(ctx, from, msg),
        Message::BlocksResponse(msg) => blocks_response::handle(ctx, from, msg),
        Message::Heartbeat(msg) => heartbeat::handle(ctx, from, msg),
        Message::BlockAnnounce(msg) => block_announce::handle(ctx, from, msg),
    }
}
