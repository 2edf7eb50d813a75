//! Configuration for the synchronization engine.

use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration options for the synchronizer.
///
/// These parameters control how aggressively the node catches up, how
/// much it serves to others, and how it defends itself against hostile
/// traffic.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncConfig {
    /// Recent-window size, in blocks.
    ///
    /// Used both as the cap on a single range request and as the
    /// retention horizon a non-archival node is willing to serve.
    ///
    /// Default: 720
    pub latest_block_interval: u32,

    /// Maximum number of blocks carried in one `MoreBlocks` response.
    ///
    /// Long range reads are split into chunks of this size, yielding
    /// between chunks so the loop stays responsive.
    ///
    /// Default: 10
    pub block_per_message: u32,

    /// Whether this node retains and serves the full block history.
    ///
    /// Archival nodes answer range requests at any height; others only
    /// serve the recent window.
    ///
    /// Default: false
    pub node_network: bool,

    /// Silence on an open session before it is swept to `Uncompleted`.
    ///
    /// Default: 10s
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub session_timeout: Duration,

    /// Maximum number of concurrently open sessions.
    ///
    /// Default: 8
    pub max_open_sessions: usize,

    /// Protocol violations tolerated inside `ban_window` before a ban.
    ///
    /// Default: 10
    pub max_invalids: u32,

    /// Sliding window for counting violations, and the ban TTL.
    ///
    /// Default: 1h
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub ban_window: Duration,

    /// How far behind the best known peer height the node may fall
    /// before it opens a sync session.
    ///
    /// Default: 2
    pub sync_trigger_delta: u32,

    /// Cadence of the periodic heartbeat tick.
    ///
    /// The tick sweeps sessions, retries handshakes, announces our tip
    /// and opens new sync sessions when behind.
    ///
    /// Default: 1s
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub heartbeat_interval: Duration,

    /// Largest accepted wire frame, compressed or not.
    ///
    /// Default: 8 MiB
    pub max_frame_size: usize,

    /// Capacity of the bounded inbound and outbound channels.
    ///
    /// Default: 1024
    pub channel_capacity: usize,

    /// Maximum number of peer records retained.
    ///
    /// When the table is full, the oldest disconnected record is
    /// evicted first.
    ///
    /// Default: 1024
    pub max_peers: usize,

    /// Inbound bundle rate allowed per peer (bundles per second).
    ///
    /// Default: 100.0
    pub rate_limit_per_second: f64,

    /// Burst capacity for the per-peer rate limit.
    ///
    /// Default: 200
    pub rate_limit_burst: u32,

    /// Smallest payload worth compressing.
    ///
    /// Default: 4 KiB
    pub compression_min_size: usize,

    /// How long a handler may wait on a full outbound queue before the
    /// bundle is dropped with a warning.
    ///
    /// Default: 500ms
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub outbound_send_timeout: Duration,

    /// Pause between handshake attempts to the same peer.
    ///
    /// Default: 10s
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub hello_retry_interval: Duration,

    /// Human-readable name announced in the handshake.
    ///
    /// Default: empty
    pub moniker: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            latest_block_interval: 720,
            block_per_message: 10,
            node_network: false,
            session_timeout: Duration::from_secs(10),
            max_open_sessions: 8,
            max_invalids: 10,
            ban_window: Duration::from_secs(60 * 60),
            sync_trigger_delta: 2,
            heartbeat_interval: Duration::from_secs(1),
            max_frame_size: 8 * 1024 * 1024,
            channel_capacity: 1024,
            max_peers: 1024,
            rate_limit_per_second: 100.0,
            rate_limit_burst: 200,
            compression_min_size: 4 * 1024,
            outbound_send_timeout: Duration::from_millis(500),
            hello_retry_interval: Duration::from_secs(10),
            moniker: String::new(),
        }
    }
}

impl SyncConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for an archival node serving full history.
    pub fn archival() -> Self {
        Self {
            node_network: true,
            ..Self::default()
        }
    }

    /// Configuration tuned for local networks and tests.
    ///
    /// Short timers so sessions open, sweep and retry quickly.
    pub fn lan() -> Self {
        Self {
            session_timeout: Duration::from_millis(500),
            heartbeat_interval: Duration::from_millis(50),
            hello_retry_interval: Duration::from_millis(100),
            outbound_send_timeout: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Set the recent-window size (builder pattern).
    pub const fn with_latest_block_interval(mut self, interval: u32) -> Self {
        self.latest_block_interval = interval;
        self
    }

    /// Set the per-response block cap (builder pattern).
    pub const fn with_block_per_message(mut self, count: u32) -> Self {
        self.block_per_message = count;
        self
    }

    /// Set the archival flag (builder pattern).
    pub const fn with_node_network(mut self, archival: bool) -> Self {
        self.node_network = archival;
        self
    }

    /// Set the session timeout (builder pattern).
    pub const fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the open-session cap (builder pattern).
    pub const fn with_max_open_sessions(mut self, max: usize) -> Self {
        self.max_open_sessions = max;
        self
    }

    /// Set the ban threshold (builder pattern).
    pub const fn with_max_invalids(mut self, max: u32) -> Self {
        self.max_invalids = max;
        self
    }

    /// Set the ban window and TTL (builder pattern).
    pub const fn with_ban_window(mut self, window: Duration) -> Self {
        self.ban_window = window;
        self
    }

    /// Set the sync trigger delta (builder pattern).
    pub const fn with_sync_trigger_delta(mut self, delta: u32) -> Self {
        self.sync_trigger_delta = delta;
        self
    }

    /// Set the heartbeat cadence (builder pattern).
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the frame size cap (builder pattern).
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the per-peer rate limit (builder pattern).
    pub fn with_rate_limit(mut self, per_second: f64, burst: u32) -> Self {
        self.rate_limit_per_second = per_second;
        self.rate_limit_burst = burst;
        self
    }

    /// Set the handshake moniker (builder pattern).
    pub fn with_moniker(mut self, moniker: impl Into<String>) -> Self {
        self.moniker = moniker.into();
        self
    }

    /// Check the configuration for impossible values.
    pub fn validate(&self) -> Result<()> {
        if self.block_per_message == 0 {
            return Err(Error::Config("block_per_message must be positive".into()));
        }
        if self.latest_block_interval == 0 {
            return Err(Error::Config(
                "latest_block_interval must be positive".into(),
            ));
        }
        if self.block_per_message > self.latest_block_interval {
            return Err(Error::Config(format!(
                "block_per_message ({}) exceeds latest_block_interval ({})",
                self.block_per_message, self.latest_block_interval
            )));
        }
        if self.max_open_sessions == 0 {
            return Err(Error::Config("max_open_sessions must be positive".into()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel_capacity must be positive".into()));
        }
        Ok(())
    }
}
