//! Tip announcement handler.

use tracing::trace;

use super::{HandlerContext, Outbound};
use crate::{error::Result, message::Heartbeat, peer::PeerId};

pub(crate) fn handle(
    ctx: &mut HandlerContext<'_>,
    from: PeerId,
    msg: Heartbeat,
) -> Result<Vec<Outbound>> {
    trace!(peer = %from, height = msg.height, round = msg.round, "heartbeat");
    ctx.peers.update_claimed_height(from, msg.height);
    Ok(vec![])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testutil::*;
    use crate::message::Message;

    #[test]
    fn test_heartbeat_updates_claim() {
        let mut env = Env::new();
        let peer = PeerId::from_bytes([9; 32]);
        env.make_known(peer, 10);

        env.dispatch_ok(
            peer,
            Message::Heartbeat(Heartbeat {
                height: 55,
                round: 1,
            }),
        );
        assert_eq!(env.peers.get(&peer).unwrap().claimed_height, 55);

        // Stale announcements never lower a claim.
        env.dispatch_ok(
            peer,
            Message::Heartbeat(Heartbeat {
                height: 40,
                round: 2,
            }),
        );
        assert_eq!(env.peers.get(&peer).unwrap().claimed_height, 55);
    }
}
