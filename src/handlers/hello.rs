//! Handshake announcement handler.

use tracing::{debug, trace};

use super::{HandlerContext, Outbound};
use crate::{
    bundle::BundleFlags,
    error::{Error, Result},
    message::{handshake_sign_bytes, HandshakeCode, Hello, HelloAck, Message},
    peer::{PeerId, PeerStatus},
};

pub(crate) fn handle(
    ctx: &mut HandlerContext<'_>,
    from: PeerId,
    msg: Hello,
) -> Result<Vec<Outbound>> {
    if msg.peer_id != from {
        return Err(Error::ProtocolViolation(format!(
            "hello claims peer {} but came from {}",
            msg.peer_id, from
        )));
    }

    let sign_bytes = handshake_sign_bytes(msg.network_id, &msg.peer_id, msg.height, msg.nonce);
    if !ctx
        .crypto
        .verify(&msg.public_key, &sign_bytes, &msg.signature)
    {
        return Err(Error::ProtocolViolation(format!(
            "invalid hello signature from {}",
            from
        )));
    }

    // A neighbour on another network is not hostile; just ignore it.
    if msg.network_id != ctx.network_id {
        trace!(
            peer = %from,
            theirs = msg.network_id,
            ours = ctx.network_id,
            "hello from a foreign network"
        );
        return Ok(vec![]);
    }

    ctx.peers.update_claim(
        from,
        msg.height,
        msg.public_key,
        msg.agent,
        msg.moniker,
        msg.flags,
    );
    promote_to_known(ctx, from);

    let height = ctx.state.last_block_height();
    let ack_sign = handshake_sign_bytes(ctx.network_id, &ctx.local_id, height, msg.nonce);
    let ack = HelloAck {
        code: HandshakeCode::Ok,
        reason: String::new(),
        peer_id: ctx.local_id,
        height,
        public_key: ctx.crypto.public_key(),
        signature: ctx.crypto.sign(&ack_sign),
        nonce: msg.nonce,
    };
    debug!(peer = %from, height = msg.height, "handshake accepted");

    Ok(vec![
        Outbound::to(from, Message::HelloAck(ack)).with_flags(BundleFlags::HELLO_ACK)
    ])
}

/// Walk the status graph up to `Known`, whatever the starting point.
fn promote_to_known(ctx: &mut HandlerContext<'_>, pid: PeerId) {
    loop {
        match ctx.peers.get_status(&pid) {
            PeerStatus::Unknown | PeerStatus::Disconnected => {
                ctx.peers.update_status(pid, PeerStatus::Connected);
            }
            PeerStatus::Connected => {
                ctx.peers.update_status(pid, PeerStatus::Known);
            }
            PeerStatus::Known | PeerStatus::Banned => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testutil::*;
    use crate::state::Crypto;

    #[test]
    fn test_hello_promotes_and_acks() {
        let mut env = Env::new();
        let peer = PeerId::from_bytes([9; 32]);
        let hello = env.make_peer_hello(peer, 50, 7);

        let out = env.dispatch_ok(peer, Message::Hello(hello));

        assert_eq!(env.peers.get_status(&peer), PeerStatus::Known);
        let record = env.peers.get(&peer).unwrap();
        assert_eq!(record.claimed_height, 50);
        assert_eq!(record.moniker, "peer");

        assert_eq!(out.len(), 1);
        assert!(out[0].flags.contains(BundleFlags::HELLO_ACK));
        match &out[0].message {
            Message::HelloAck(ack) => {
                assert_eq!(ack.code, HandshakeCode::Ok);
                assert_eq!(ack.nonce, 7);
                assert_eq!(ack.peer_id, env.local_id);
            }
            other => panic!("expected hello-ack, got {:?}", other),
        }
    }

    #[test]
    fn test_hello_bad_signature_is_violation() {
        let mut env = Env::new();
        let peer = PeerId::from_bytes([9; 32]);
        let mut hello = env.make_peer_hello(peer, 50, 7);
        hello.signature = bytes::Bytes::from_static(b"forged");

        let err = env.dispatch_err(peer, Message::Hello(hello));
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(env.peers.get_status(&peer), PeerStatus::Unknown);
    }

    #[test]
    fn test_hello_foreign_network_dropped_silently() {
        let mut env = Env::new();
        let peer = PeerId::from_bytes([9; 32]);
        let mut hello = env.make_peer_hello(peer, 50, 7);
        hello.network_id = env.network_id + 1;
        // Re-sign for the foreign network so only the network check trips.
        let sign = handshake_sign_bytes(hello.network_id, &peer, hello.height, hello.nonce);
        hello.signature = env.peer_crypto.sign(&sign);

        let out = env.dispatch_ok(peer, Message::Hello(hello));
        assert!(out.is_empty());
        assert_eq!(env.peers.get_status(&peer), PeerStatus::Unknown);
    }

    #[test]
    fn test_hello_spoofed_peer_id_is_violation() {
        let mut env = Env::new();
        let peer = PeerId::from_bytes([9; 32]);
        let hello = env.make_peer_hello(PeerId::from_bytes([8; 32]), 50, 7);

        let err = env.dispatch_err(peer, Message::Hello(hello));
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }
}
