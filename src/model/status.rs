//! Client status
//!
//! [`Lifecycle`] is the controller's internal position; [`Status`] is what a
//! user gets to see. Every failure ends up as one of the status values, never
//! as a raw error.

use std::fmt;

/// High-level position of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Waiting,
    Paired,
    Ended,
}

/// User-visible status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Connecting,
    WaitingForPartner,
    Connected,
    PartnerDisconnected,
    MediaAccessError,
    NegotiationError,
    /// The local user hung up.
    CallEnded,
}

impl Status {
    /// Whether this status ends the client; re-pairing needs a restart.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::PartnerDisconnected
                | Status::MediaAccessError
                | Status::NegotiationError
                | Status::CallEnded
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Connecting => "Connecting...",
            Status::WaitingForPartner => "Waiting for a partner...",
            Status::Connected => "Connected!",
            Status::PartnerDisconnected => "Partner disconnected. Restart to find a new one.",
            Status::MediaAccessError => "Could not access camera or microphone.",
            Status::NegotiationError => "Could not establish the call.",
            Status::CallEnded => "Call ended.",
        };
        f.write_str(text)
    }
}
