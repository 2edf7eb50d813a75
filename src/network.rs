//! Network layer seam.
//!
//! The synchronizer never opens sockets. The embedding node implements
//! [`NetworkService`] over its transport and feeds inbound frames and
//! connectivity changes through the
//! [`SynchronizerHandle`](crate::SynchronizerHandle).

use bytes::Bytes;
use std::future::Future;

use crate::peer::PeerId;

/// Outbound half of the network layer.
///
/// Implementations must deliver frames to the addressed peer in send
/// order. Delivery is best-effort; peers retransmit what matters.
#[auto_impl::auto_impl(Box, Arc)]
pub trait NetworkService: Send + Sync + 'static {
    /// Error type for send operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a frame to a specific peer (unicast).
    fn send_to(
        &self,
        target: PeerId,
        frame: Bytes,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Send a frame to every connected peer.
    fn broadcast(&self, frame: Bytes) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Where a frame handed to [`ChannelNetwork`] was addressed.
///
/// `None` means broadcast.
pub type Addressed = (Option<PeerId>, Bytes);

/// A channel-backed network that outputs addressed frames.
///
/// Useful for tests or when the embedding node routes frames itself.
#[derive(Debug, Clone)]
pub struct ChannelNetwork {
    tx: async_channel::Sender<Addressed>,
}

impl ChannelNetwork {
    /// Create a channel network over an existing sender.
    pub fn new(tx: async_channel::Sender<Addressed>) -> Self {
        Self { tx }
    }

    /// Create a channel network with a new bounded channel.
    ///
    /// Returns the network and the receiver of addressed frames.
    pub fn bounded(capacity: usize) -> (Self, async_channel::Receiver<Addressed>) {
        let (tx, rx) = async_channel::bounded(capacity);
        (Self { tx }, rx)
    }
}

/// Error type for the channel network.
#[derive(Debug, Clone)]
pub struct ChannelNetworkError(pub String);

impl std::fmt::Display for ChannelNetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel network error: {}", self.0)
    }
}

impl std::error::Error for ChannelNetworkError {}

impl NetworkService for ChannelNetwork {
    type Error = ChannelNetworkError;

    async fn send_to(&self, target: PeerId, frame: Bytes) -> Result<(), Self::Error> {
        self.tx
            .send((Some(target), frame))
            .await
            .map_err(|e| ChannelNetworkError(e.to_string()))
    }

    async fn broadcast(&self, frame: Bytes) -> Result<(), Self::Error> {
        self.tx
            .send((None, frame))
            .await
            .map_err(|e| ChannelNetworkError(e.to_string()))
    }
}

/// A network that discards all frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNetwork;

impl NetworkService for NoopNetwork {
    type Error = std::convert::Infallible;

    async fn send_to(&self, _target: PeerId, _frame: Bytes) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn broadcast(&self, _frame: Bytes) -> Result<(), Self::Error> {
        Ok(())
    }
}
