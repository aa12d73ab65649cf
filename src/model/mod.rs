//! Data models for paired calls
//!
//! This module contains the plain data structures shared by the signaling
//! adapter, the negotiation state machine and the lifecycle controller.

pub mod envelope;
pub mod media;
pub mod status;
pub mod traversal;

pub use envelope::{
    ClientMessage, IceCandidate, SdpType, ServerMessage, SessionDescription, SignalEnvelope,
    SignalKind,
};
pub use media::{LocalMedia, LocalTrack, MediaKind, RemoteMedia};
pub use status::{Lifecycle, Status};
pub use traversal::{Credentials, IceServer, TraversalConfig};
