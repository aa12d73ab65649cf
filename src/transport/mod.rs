//! Media transport seam
//!
//! The negotiation state machine drives an underlying peer-connection object
//! through [`MediaTransport`]. The production implementation is
//! [`rtc::RtcTransport`], built on str0m; tests substitute an in-memory fake.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::model::{IceCandidate, LocalTrack, RemoteMedia, SessionDescription, TraversalConfig};

#[cfg(test)]
pub mod fake;
pub mod rtc;
pub mod stun;

/// Connectivity as observed by the transport's own ICE checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Checking,
    Connected,
    /// Connectivity was lost; the transport may still recover.
    Disconnected,
    /// The transport is dead and will not recover.
    Failed,
}

/// Events raised by a transport, delivered in the controller's serial context.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A newly gathered local candidate, to be trickled immediately.
    LocalCandidate(IceCandidate),
    /// A remote track arrived.
    RemoteMedia(RemoteMedia),
    Connectivity(Connectivity),
}

/// One peer connection, scoped to a single negotiation.
#[async_trait]
pub trait MediaTransport: Send {
    /// Adds a local track of stream `stream_id` to be announced in the next description.
    fn attach(&mut self, stream_id: &str, track: &LocalTrack) -> Result<(), TransportError>;

    /// Creates a local offer and applies it as the local description.
    fn create_offer(&mut self) -> Result<SessionDescription, TransportError>;

    /// Applies a remote offer and returns the applied local answer.
    fn accept_offer(
        &mut self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, TransportError>;

    /// Applies the remote answer to the outstanding local offer.
    fn accept_answer(&mut self, answer: &SessionDescription) -> Result<(), TransportError>;

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), TransportError>;

    /// Waits for the next event. Must be cancel-safe; returns `None` once closed.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Releases the connection and every attached track. Idempotent.
    fn close(&mut self);
}

/// Builds a fresh transport for each pairing.
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: MediaTransport + 'static;

    async fn open(&self, config: &TraversalConfig) -> Result<Self::Transport, TransportError>;
}
