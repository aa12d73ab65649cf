//! Error taxonomy
//!
//! Each error is handled by the component that detects it and turned into a
//! [`Status`](crate::model::Status) by the controller.

use thiserror::Error;

/// Errors that can occur inside the media transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket binding, address selection or other construction failure
    #[error("transport setup failed: {0}")]
    Setup(String),
    /// A session description could not be produced or applied
    #[error("session description rejected: {0}")]
    Sdp(String),
    /// A remote candidate could not be parsed or applied
    #[error("candidate rejected: {0}")]
    Candidate(String),
    #[error("transport already closed")]
    Closed,
    /// Connectivity checks failed or the connection died
    #[error("media connection failed")]
    Failed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The relay link is gone and will not come back.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("signaling channel closed")]
pub struct ChannelError;

/// Local capture was unavailable or denied.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("media access failed: {0}")]
pub struct MediaAccessError(pub String);

/// Reasons a negotiation ends abnormally. All of them are fatal to the
/// negotiation only.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("signaling channel lost mid-handshake")]
    ChannelLoss,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures of the credential collaborator. Never surfaced past the resolver.
#[derive(Debug, Error)]
pub enum TraversalError {
    #[error("credential request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("credential service answered {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed credential response: {0}")]
    Malformed(String),
}
