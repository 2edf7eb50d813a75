//! Handshake confirmation handler (initiator side).

use tracing::debug;

use super::{HandlerContext, Outbound};
use crate::{
    error::{Error, Result},
    message::{handshake_sign_bytes, HandshakeCode, HelloAck},
    peer::{PeerId, PeerStatus},
};

pub(crate) fn handle(
    ctx: &mut HandlerContext<'_>,
    from: PeerId,
    msg: HelloAck,
) -> Result<Vec<Outbound>> {
    if msg.peer_id != from {
        return Err(Error::ProtocolViolation(format!(
            "hello-ack claims peer {} but came from {}",
            msg.peer_id, from
        )));
    }

    // An ack must answer a hello we actually sent.
    match ctx.peers.take_hello_nonce(&from) {
        Some(nonce) if nonce == msg.nonce => {}
        _ => {
            return Err(Error::ProtocolViolation(format!(
                "unsolicited hello-ack from {}",
                from
            )));
        }
    }

    if msg.code == HandshakeCode::Rejected {
        debug!(peer = %from, reason = %msg.reason, "handshake rejected by peer");
        return Ok(vec![]);
    }

    let sign_bytes = handshake_sign_bytes(ctx.network_id, &msg.peer_id, msg.height, msg.nonce);
    if !ctx
        .crypto
        .verify(&msg.public_key, &sign_bytes, &msg.signature)
    {
        return Err(Error::ProtocolViolation(format!(
            "invalid hello-ack signature from {}",
            from
        )));
    }

    ctx.peers.record_handshake(from, msg.height, msg.public_key);
    if ctx.peers.get_status(&from) == PeerStatus::Connected {
        ctx.peers.update_status(from, PeerStatus::Known);
    }
    debug!(peer = %from, height = msg.height, "handshake confirmed");
    Ok(vec![])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testutil::*;
    use crate::message::Message;

    #[test]
    fn test_ack_completes_handshake() {
        let mut env = Env::new();
        let peer = PeerId::from_bytes([9; 32]);
        env.peers.update_status(peer, PeerStatus::Connected);
        env.peers.mark_hello_sent(peer, 7, std::time::Instant::now());

        let ack = env.make_peer_ack(peer, 80, 7);
        let out = env.dispatch_ok(peer, Message::HelloAck(ack));

        assert!(out.is_empty());
        assert_eq!(env.peers.get_status(&peer), PeerStatus::Known);
        assert_eq!(env.peers.get(&peer).unwrap().claimed_height, 80);
    }

    #[test]
    fn test_unsolicited_ack_is_violation() {
        let mut env = Env::new();
        let peer = PeerId::from_bytes([9; 32]);
        env.peers.update_status(peer, PeerStatus::Connected);

        let ack = env.make_peer_ack(peer, 80, 7);
        let err = env.dispatch_err(peer, Message::HelloAck(ack));
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(env.peers.get_status(&peer), PeerStatus::Connected);
    }

    #[test]
    fn test_nonce_mismatch_is_violation() {
        let mut env = Env::new();
        let peer = PeerId::from_bytes([9; 32]);
        env.peers.update_status(peer, PeerStatus::Connected);
        env.peers.mark_hello_sent(peer, 7, std::time::Instant::now());

        let ack = env.make_peer_ack(peer, 80, 8);
        let err = env.dispatch_err(peer, Message::HelloAck(ack));
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[test]
    fn test_rejected_ack_keeps_peer_connected() {
        let mut env = Env::new();
        let peer = PeerId::from_bytes([9; 32]);
        env.peers.update_status(peer, PeerStatus::Connected);
        env.peers.mark_hello_sent(peer, 7, std::time::Instant::now());

        let mut ack = env.make_peer_ack(peer, 80, 7);
        ack.code = HandshakeCode::Rejected;
        ack.reason = "no capacity".into();

        let out = env.dispatch_ok(peer, Message::HelloAck(ack));
        assert!(out.is_empty());
        assert_eq!(env.peers.get_status(&peer), PeerStatus::Connected);
    }
}
