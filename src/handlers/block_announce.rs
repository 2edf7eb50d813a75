//! Just-committed block advertisement handler.

use tracing::{debug, trace};

use super::{HandlerContext, Outbound};
use crate::{
    error::{Error, Result},
    message::BlockAnnounce,
    peer::PeerId,
};

pub(crate) fn handle(
    ctx: &mut HandlerContext<'_>,
    from: PeerId,
    msg: BlockAnnounce,
) -> Result<Vec<Outbound>> {
    if msg.certificate.height != msg.height {
        return Err(Error::ProtocolViolation(format!(
            "announce at {} carries a certificate at {}",
            msg.height, msg.certificate.height
        )));
    }

    ctx.peers.update_claimed_height(from, msg.height);

    let local = ctx.state.last_block_height();
    if msg.height != local + 1 {
        // Either old news or too far ahead; the heartbeat opens a
        // session if we are genuinely behind.
        trace!(peer = %from, height = msg.height, local, "ignoring announce");
        return Ok(vec![]);
    }

    match ctx
        .state
        .commit_block(msg.height, msg.block, Some(msg.certificate))
    {
        Ok(()) => {
            debug!(peer = %from, height = msg.height, "committed announced block");
            Ok(vec![])
        }
        Err(crate::state::CommitError::Unavailable(reason)) => Err(Error::Fatal(format!(
            "state facade unavailable: {}",
            reason
        ))),
        Err(e) => Err(Error::ProtocolViolation(format!(
            "announced block {} from {} failed to commit: {}",
            msg.height, from, e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testutil::*;
    use crate::message::Message;
    use crate::state::StateFacade;
    use bytes::Bytes;

    fn announce(height: u32) -> Message {
        Message::BlockAnnounce(BlockAnnounce {
            height,
            block: test_block(height),
            certificate: test_certificate(height),
        })
    }

    #[test]
    fn test_next_block_committed() {
        let mut env = Env::with_height(10);
        let peer = PeerId::from_bytes([9; 32]);
        env.make_known(peer, 10);

        env.dispatch_ok(peer, announce(11));
        assert_eq!(env.state.last_block_height(), 11);
        assert_eq!(env.peers.get(&peer).unwrap().claimed_height, 11);
    }

    #[test]
    fn test_far_ahead_announce_only_updates_claim() {
        let mut env = Env::with_height(10);
        let peer = PeerId::from_bytes([9; 32]);
        env.make_known(peer, 10);

        env.dispatch_ok(peer, announce(50));
        assert_eq!(env.state.last_block_height(), 10);
        assert_eq!(env.peers.get(&peer).unwrap().claimed_height, 50);
    }

    #[test]
    fn test_stale_announce_ignored() {
        let mut env = Env::with_height(10);
        let peer = PeerId::from_bytes([9; 32]);
        env.make_known(peer, 10);

        env.dispatch_ok(peer, announce(5));
        assert_eq!(env.state.last_block_height(), 10);
    }

    #[test]
    fn test_mismatched_certificate_is_violation() {
        let mut env = Env::with_height(10);
        let peer = PeerId::from_bytes([9; 32]);
        env.make_known(peer, 10);

        let msg = Message::BlockAnnounce(BlockAnnounce {
            height: 11,
            block: test_block(11),
            certificate: test_certificate(12),
        });
        let err = env.dispatch_err(peer, msg);
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[test]
    fn test_corrupt_block_is_violation() {
        let mut env = Env::with_height(10);
        let peer = PeerId::from_bytes([9; 32]);
        env.make_known(peer, 10);

        let msg = Message::BlockAnnounce(BlockAnnounce {
            height: 11,
            block: Bytes::from_static(b"garbage"),
            certificate: test_certificate(11),
        });
        let err = env.dispatch_err(peer, msg);
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(env.state.last_block_height(), 10);
    }
}
