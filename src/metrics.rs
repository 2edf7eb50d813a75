//! Metrics for the synchronization engine.
//!
//! Counters and gauges for monitoring sync progress and peer behavior.

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Initialize metric descriptions.
pub fn init_metrics() {
    describe_counter!(
        "blocksync_frames_received_total",
        "Total number of frames accepted from the network"
    );
    describe_counter!(
        "blocksync_frames_sent_total",
        "Total number of frames handed to the network"
    );
    describe_counter!(
        "blocksync_frames_dropped_total",
        "Total number of frames dropped by the firewall or a full queue"
    );
    describe_counter!(
        "blocksync_bytes_received_total",
        "Total bytes accepted from the network"
    );
    describe_counter!(
        "blocksync_invalid_messages_total",
        "Total number of protocol violations observed"
    );
    describe_counter!(
        "blocksync_sessions_opened_total",
        "Total number of sync sessions opened"
    );
    describe_counter!(
        "blocksync_sessions_uncompleted_total",
        "Total number of sync sessions that failed or timed out"
    );

    describe_gauge!("blocksync_known_peers", "Current number of handshaked peers");
    describe_gauge!("blocksync_open_sessions", "Current number of open sessions");
    describe_gauge!(
        "blocksync_last_block_height",
        "Height of the last committed block"
    );
}

pub(crate) fn inc_frames_received(bytes: usize) {
    counter!("blocksync_frames_received_total").increment(1);
    counter!("blocksync_bytes_received_total").increment(bytes as u64);
}

pub(crate) fn inc_frames_sent() {
    counter!("blocksync_frames_sent_total").increment(1);
}

pub(crate) fn inc_frames_dropped() {
    counter!("blocksync_frames_dropped_total").increment(1);
}

pub(crate) fn inc_invalid_messages() {
    counter!("blocksync_invalid_messages_total").increment(1);
}

pub(crate) fn inc_sessions_opened() {
    counter!("blocksync_sessions_opened_total").increment(1);
}

pub(crate) fn inc_sessions_uncompleted() {
    counter!("blocksync_sessions_uncompleted_total").increment(1);
}

pub(crate) fn set_known_peers(count: usize) {
    gauge!("blocksync_known_peers").set(count as f64);
}

pub(crate) fn set_open_sessions(count: usize) {
    gauge!("blocksync_open_sessions").set(count as f64);
}

pub(crate) fn set_last_block_height(height: u32) {
    gauge!("blocksync_last_block_height").set(height as f64);
}
