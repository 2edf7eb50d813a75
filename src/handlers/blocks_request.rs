//! Server side of the block-range protocol.
//!
//! Answers a remote peer's range request with `MoreBlocks` chunks and a
//! terminal `Synced` or `NoMoreBlocks`. The server keeps no session
//! state of its own; everything it needs is in the request.

use smallvec::SmallVec;
use tracing::debug;

use super::{HandlerContext, Outbound};
use crate::{
    error::Result,
    message::{BlocksRequest, BlocksResponse, Message, ResponseCode},
    peer::PeerId,
    state::StateFacade,
};

pub(crate) fn handle(
    ctx: &mut HandlerContext<'_>,
    from: PeerId,
    msg: BlocksRequest,
) -> Result<Vec<Outbound>> {
    let status = ctx.peers.get_status(&from);
    if status.is_unknown() {
        return Ok(vec![reject(
            from,
            msg.session_id,
            format!("unknown peer ({})", from),
        )]);
    }
    if !status.is_known() {
        return Ok(vec![reject(
            from,
            msg.session_id,
            format!("not handshaked ({})", status),
        )]);
    }

    let our_height = ctx.state.last_block_height();
    if !ctx.config.node_network
        && our_height > ctx.config.latest_block_interval
        && msg.from < our_height - ctx.config.latest_block_interval
    {
        return Ok(vec![reject(
            from,
            msg.session_id,
            format!("request height is not acceptable: {}", msg.from),
        )]);
    }

    if msg.from > our_height {
        return Ok(vec![reject(
            from,
            msg.session_id,
            format!("don't have requested blocks: {}", msg.from),
        )]);
    }

    if msg.count > ctx.config.latest_block_interval {
        return Ok(vec![reject(
            from,
            msg.session_id,
            format!("too many blocks requested: {}-{}", msg.from, msg.count),
        )]);
    }

    // Help this peer sync up, one chunk per response.
    let mut out = Vec::new();
    let mut height = msg.from;
    let mut remaining = msg.count;
    loop {
        let chunk = ctx.config.block_per_message.min(remaining);
        let blocks = read_blocks(ctx.state, height, chunk);
        if blocks.is_empty() {
            break;
        }
        let served = blocks.len() as u32;
        debug!(peer = %from, session = msg.session_id, height, count = served, "serving blocks");
        out.push(Outbound::to(
            from,
            Message::BlocksResponse(BlocksResponse {
                code: ResponseCode::MoreBlocks,
                session_id: msg.session_id,
                from: height,
                reason: String::new(),
                blocks,
                certificate: None,
            }),
        ));
        height += served;
        remaining -= served;
        if remaining == 0 {
            break;
        }
    }

    if msg.to() >= our_height {
        let cert = ctx.state.last_certificate();
        debug!(peer = %from, session = msg.session_id, height = cert.height, "peer synced");
        out.push(Outbound::to(
            from,
            Message::BlocksResponse(BlocksResponse {
                code: ResponseCode::Synced,
                session_id: msg.session_id,
                from: cert.height,
                reason: String::new(),
                blocks: SmallVec::new(),
                certificate: Some(cert),
            }),
        ));
        return Ok(out);
    }

    out.push(Outbound::to(
        from,
        Message::BlocksResponse(BlocksResponse {
            code: ResponseCode::NoMoreBlocks,
            session_id: msg.session_id,
            from: 0,
            reason: String::new(),
            blocks: SmallVec::new(),
            certificate: None,
        }),
    ));
    Ok(out)
}

/// Read up to `count` consecutive blocks starting at `height`.
fn read_blocks(state: &dyn StateFacade, height: u32, count: u32) -> SmallVec<[bytes::Bytes; 8]> {
    (0..count)
        .map_while(|i| state.block_at(height + i))
        .collect()
}

fn reject(to: PeerId, session_id: u32, reason: String) -> Outbound {
    debug!(peer = %to, session = session_id, %reason, "rejecting block request");
    Outbound::to(
        to,
        Message::BlocksResponse(BlocksResponse {
            code: ResponseCode::Rejected,
            session_id,
            from: 0,
            reason,
            blocks: SmallVec::new(),
            certificate: None,
        }),
    )
}
