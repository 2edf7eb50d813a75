//! Client side of the block-range protocol.
//!
//! Consumes responses for an open session: commits delivered blocks,
//! closes the session on a terminal code, and scores the serving peer.

use tracing::{debug, warn};

use super::{HandlerContext, Outbound};
use crate::{
    error::{Error, Result},
    message::{BlocksResponse, ResponseCode},
    peer::PeerId,
    session::SessionStatus,
    state::CommitError,
};

pub(crate) fn handle(
    ctx: &mut HandlerContext<'_>,
    from: PeerId,
    msg: BlocksResponse,
) -> Result<Vec<Outbound>> {
    let Some(session) = ctx.sessions.get(msg.session_id) else {
        return Err(Error::ProtocolViolation(format!(
            "response for unknown session {}",
            msg.session_id
        )));
    };
    if session.peer != from {
        return Err(Error::ProtocolViolation(format!(
            "session {} belongs to {}, response came from {}",
            msg.session_id, session.peer, from
        )));
    }
    ctx.sessions.touch(msg.session_id);

    match msg.code {
        ResponseCode::MoreBlocks => {
            let mut height = msg.from;
            for block in msg.blocks {
                if let Err(e) = ctx.state.commit_block(height, block, None) {
                    warn!(
                        peer = %from,
                        session = msg.session_id,
                        height,
                        error = %e,
                        "commit failed, abandoning session"
                    );
                    ctx.sessions
                        .close(msg.session_id, SessionStatus::Uncompleted);
                    if let CommitError::Unavailable(reason) = e {
                        return Err(Error::Fatal(format!("state facade unavailable: {}", reason)));
                    }
                    ctx.peers.penalize(from);
                    return Err(Error::ProtocolViolation(format!(
                        "block {} from {} failed to commit: {}",
                        height, from, e
                    )));
                }
                height += 1;
            }
            debug!(
                peer = %from,
                session = msg.session_id,
                upto = height.saturating_sub(1),
                "committed block chunk"
            );
        }
        ResponseCode::NoMoreBlocks => {
            debug!(peer = %from, session = msg.session_id, "range exhausted");
            ctx.sessions.close(msg.session_id, SessionStatus::Completed);
        }
        ResponseCode::Synced => {
            // Presence is a decode invariant; height must match the tip
            // we just committed up to.
            let Some(cert) = msg.certificate else {
                ctx.sessions
                    .close(msg.session_id, SessionStatus::Uncompleted);
                return Err(Error::ProtocolViolation(
                    "synced response without a certificate".into(),
                ));
            };
            let local = ctx.state.last_block_height();
            if cert.height != local {
                ctx.sessions
                    .close(msg.session_id, SessionStatus::Uncompleted);
                ctx.peers.penalize(from);
                return Err(Error::ProtocolViolation(format!(
                    "synced certificate at {} does not match local tip {}",
                    cert.height, local
                )));
            }
            debug!(peer = %from, session = msg.session_id, height = local, "synced with peer");
            ctx.sessions.close(msg.session_id, SessionStatus::Completed);
        }
        ResponseCode::Rejected => {
            // Not every rejection is hostile (e.g. a pruned node), so
            // this only costs the peer selection weight.
            debug!(peer = %from, session = msg.session_id, reason = %msg.reason, "request rejected");
            ctx.sessions
                .close(msg.session_id, SessionStatus::Uncompleted);
            ctx.peers.penalize(from);
        }
    }
    Ok(vec![])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testutil::*;
    use crate::message::Message;
    use crate::state::StateFacade;
    use bytes::Bytes;
    use smallvec::{smallvec, SmallVec};

    fn more_blocks(session_id: u32, from: u32, blocks: SmallVec<[Bytes; 8]>) -> Message {
        Message::BlocksResponse(BlocksResponse {
            code: ResponseCode::MoreBlocks,
            session_id,
            from,
            reason: String::new(),
            blocks,
            certificate: None,
        })
    }

    fn terminal(session_id: u32, code: ResponseCode, cert_height: Option<u32>) -> Message {
        Message::BlocksResponse(BlocksResponse {
            code,
            session_id,
            from: cert_height.unwrap_or(0),
            reason: String::new(),
            blocks: smallvec![],
            certificate: cert_height.map(test_certificate),
        })
    }

    #[test]
    fn test_unknown_session_is_violation() {
        let mut env = Env::new();
        let peer = PeerId::from_bytes([9; 32]);
        env.make_known(peer, 100);

        let err = env.dispatch_err(peer, terminal(42, ResponseCode::NoMoreBlocks, None));
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[test]
    fn test_response_from_wrong_peer_is_violation() {
        let mut env = Env::new();
        let serving = PeerId::from_bytes([9; 32]);
        let other = PeerId::from_bytes([8; 32]);
        env.make_known(serving, 100);
        env.make_known(other, 100);
        let sid = env.sessions.open(serving, 1, 10).unwrap();

        let err = env.dispatch_err(other, terminal(sid, ResponseCode::NoMoreBlocks, None));
        assert!(matches!(err, Error::ProtocolViolation(_)));
        // The session survives for the real peer.
        assert!(env.sessions.get(sid).is_some());
    }

    #[test]
    fn test_more_blocks_commits_in_order() {
        let mut env = Env::with_height(10);
        let peer = PeerId::from_bytes([9; 32]);
        env.make_known(peer, 100);
        let sid = env.sessions.open(peer, 11, 3).unwrap();

        let blocks = smallvec![test_block(11), test_block(12), test_block(13)];
        env.dispatch_ok(peer, more_blocks(sid, 11, blocks));

        assert_eq!(env.state.last_block_height(), 13);
        assert!(env.sessions.get(sid).is_some());
    }

    #[test]
    fn test_corrupt_block_closes_session() {
        let mut env = Env::with_height(10);
        let peer = PeerId::from_bytes([9; 32]);
        env.make_known(peer, 100);
        let sid = env.sessions.open(peer, 11, 3).unwrap();

        let blocks = smallvec![Bytes::from_static(b"garbage")];
        let err = env.dispatch_err(peer, more_blocks(sid, 11, blocks));

        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert!(env.sessions.get(sid).is_none());
        assert_eq!(env.peers.get(&peer).unwrap().session_failures, 1);
        assert_eq!(env.state.last_block_height(), 10);
    }

    #[test]
    fn test_replayed_chunk_is_idempotent() {
        let mut env = Env::with_height(10);
        let peer = PeerId::from_bytes([9; 32]);
        env.make_known(peer, 100);
        let sid = env.sessions.open(peer, 11, 2).unwrap();

        let blocks: SmallVec<[Bytes; 8]> = smallvec![test_block(11), test_block(12)];
        env.dispatch_ok(peer, more_blocks(sid, 11, blocks.clone()));
        env.dispatch_ok(peer, more_blocks(sid, 11, blocks));

        assert_eq!(env.state.last_block_height(), 12);
    }

    #[test]
    fn test_no_more_blocks_completes_session() {
        let mut env = Env::new();
        let peer = PeerId::from_bytes([9; 32]);
        env.make_known(peer, 100);
        let sid = env.sessions.open(peer, 1, 10).unwrap();

        env.dispatch_ok(peer, terminal(sid, ResponseCode::NoMoreBlocks, None));
        assert!(env.sessions.get(sid).is_none());
        assert_eq!(env.peers.get(&peer).unwrap().session_failures, 0);
    }

    #[test]
    fn test_synced_with_matching_tip_completes() {
        let mut env = Env::with_height(100);
        let peer = PeerId::from_bytes([9; 32]);
        env.make_known(peer, 100);
        let sid = env.sessions.open(peer, 101, 10).unwrap();

        env.dispatch_ok(peer, terminal(sid, ResponseCode::Synced, Some(100)));
        assert!(env.sessions.get(sid).is_none());
    }

    #[test]
    fn test_synced_with_wrong_tip_is_violation() {
        let mut env = Env::with_height(90);
        let peer = PeerId::from_bytes([9; 32]);
        env.make_known(peer, 100);
        let sid = env.sessions.open(peer, 91, 10).unwrap();

        let err = env.dispatch_err(peer, terminal(sid, ResponseCode::Synced, Some(100)));
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert!(env.sessions.get(sid).is_none());
        assert_eq!(env.peers.get(&peer).unwrap().session_failures, 1);
    }

    #[test]
    fn test_rejection_penalizes_lightly() {
        let mut env = Env::new();
        let peer = PeerId::from_bytes([9; 32]);
        env.make_known(peer, 100);
        let sid = env.sessions.open(peer, 1, 10).unwrap();

        let msg = Message::BlocksResponse(BlocksResponse {
            code: ResponseCode::Rejected,
            session_id: sid,
            from: 0,
            reason: "request height is not acceptable: 1".into(),
            blocks: smallvec![],
            certificate: None,
        });
        env.dispatch_ok(peer, msg);

        assert!(env.sessions.get(sid).is_none());
        let record = env.peers.get(&peer).unwrap();
        assert_eq!(record.session_failures, 1);
        assert_eq!(record.invalid_messages, 0);
    }
}
