//! # blocksync
//!
//! Session-oriented block synchronization engine for a proof-of-stake
//! node. The engine drives a lagging node to catch up with the network,
//! serves block-range requests to others, and bounds resource
//! consumption under adversarial inputs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Embedding node                            │
//! │        (transport, consensus, store, via seam traits)           │
//! └───────┬──────────────────────────────────────────────▲──────────┘
//! │ SynchronizerHandle                      NetworkService │
//! ┌───────▼──────────────────────────────────────────────┴──────────┐
//! │                        Synchronizer                             │
//! │     (single-task event loop, heartbeat, dispatch table)         │
//! ├──────────────┬──────────────┬──────────────┬────────────────────┤
//! │   PeerSet    │   Sessions   │   Firewall   │      Handlers      │
//! │ (status,     │ (open/close/ │ (bans, rate  │  (one per message  │
//! │  scoring)    │  sweep)      │  and size)   │   kind)            │
//! ├──────────────┴──────────────┴──────────────┴────────────────────┤
//! │                     Bundle codec + compression                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## How syncing works
//!
//! - Peers exchange signed `Hello`/`HelloAck` messages; a confirmed
//!   handshake promotes a peer to `Known`.
//! - A periodic heartbeat compares our tip against the best claimed
//!   peer height. When we lag, a session is opened against the best
//!   `Known` peer and a `BlocksRequest` goes out.
//! - The serving side answers in `MoreBlocks` chunks and finishes with
//!   `Synced` (tip certificate attached) or `NoMoreBlocks`.
//! - Sessions that stay silent are swept, the peer is penalized, and
//!   the next heartbeat fails over to another peer.
//!
//! ## Example
//!
//! ```ignore
//! use blocksync::{Synchronizer, SyncConfig, PeerId};
//!
//! let (sync, handle) = Synchronizer::new(
//!     SyncConfig::archival(),
//!     PeerId::random(),
//!     network_id,
//!     crypto,    // impl Crypto
//!     state,     // impl StateFacade
//!     network,   // impl NetworkService
//! )?;
//!
//! // Drive the loop on your executor.
//! executor.spawn(sync.run());
//!
//! // Feed it from the transport.
//! handle.peer_connected(peer).await?;
//! handle.deliver(peer, frame).await?;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

mod bundle;
mod compression;
mod config;
mod error;
mod firewall;
mod handlers;
mod message;
mod network;
mod peer;
mod peer_set;
mod session;
mod state;
mod synchronizer;

pub mod testing;

#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub mod metrics;

// Re-export bundle types
pub use bundle::{peek_header, Bundle, BundleFlags, BundleHeader, BUNDLE_VERSION, HEADER_SIZE};

// Re-export compression types
pub use compression::{compress, decompress, CompressionError};

// Re-export config types
pub use config::SyncConfig;

// Re-export error types
pub use error::{Error, Result};

// Re-export firewall types
pub use firewall::{Firewall, FirewallReject};

// Re-export message types
pub use message::{
    handshake_sign_bytes, BlockAnnounce, BlocksRequest, BlocksResponse, HandshakeCode, Heartbeat,
    Hello, HelloAck, Message, MessageTag, ResponseCode, MAX_BLOCKS_PER_RESPONSE,
};

// Re-export network seam types
pub use network::{Addressed, ChannelNetwork, ChannelNetworkError, NetworkService, NoopNetwork};

// Re-export peer types
pub use peer::{Peer, PeerFlags, PeerId, PeerStatus, PublicKey};

// Re-export peer set types
pub use peer_set::{PeerSet, PeerSetStats, StatusChange};

// Re-export session types
pub use session::{Session, SessionManager, SessionStatus};

// Re-export state seam types
pub use state::{Certificate, CommitError, Crypto, StateFacade};

// Re-export the engine
pub use synchronizer::{Event, Synchronizer, SynchronizerHandle, AGENT};
