//! Signaling envelopes and relay wire messages
//!
//! Envelopes are exchanged between the two paired clients through the relay,
//! which forwards them without looking at the payload. Payloads use the same
//! JSON shapes a browser peer produces, so either side may be a browser.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One handshake step between paired clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// The unit of signaling: a kind plus a payload only the peers interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub kind: SignalKind,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description in `RTCSessionDescriptionInit` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// A trickled ICE candidate in `RTCIceCandidateInit` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

impl SignalEnvelope {
    pub fn offer(description: &SessionDescription) -> Self {
        Self::wrap(SignalKind::Offer, description)
    }

    pub fn answer(description: &SessionDescription) -> Self {
        Self::wrap(SignalKind::Answer, description)
    }

    pub fn candidate(candidate: &IceCandidate) -> Self {
        Self::wrap(SignalKind::IceCandidate, candidate)
    }

    fn wrap<T: Serialize>(kind: SignalKind, body: &T) -> Self {
        // Plain structs with string fields always serialise.
        let payload = serde_json::to_value(body).unwrap_or(Value::Null);
        Self { kind, payload }
    }

    /// Decodes the payload as a session description of the expected type.
    ///
    /// ## Returns
    ///
    /// * `Ok(SessionDescription)`: the payload parsed and its `type` matches.
    /// * `Err(String)`: the payload is malformed or carries the other type.
    pub fn session_description(&self, expected: SdpType) -> Result<SessionDescription, String> {
        let description: SessionDescription =
            serde_json::from_value(self.payload.clone()).map_err(|e| e.to_string())?;
        if description.sdp_type != expected {
            return Err(format!(
                "expected {:?} description, got {:?}",
                expected, description.sdp_type
            ));
        }
        Ok(description)
    }

    pub fn ice_candidate(&self) -> Result<IceCandidate, String> {
        let candidate: IceCandidate =
            serde_json::from_value(self.payload.clone()).map_err(|e| e.to_string())?;
        if candidate.candidate.trim().is_empty() {
            return Err("empty candidate line".to_string());
        }
        Ok(candidate)
    }
}

/// Messages this client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Enter (or re-enter after a reconnect) the matchmaking pool.
    Ready,
    Signal {
        data: SignalEnvelope,
    },
    /// Local hang-up.
    Leave,
}

/// Messages the relay sends to this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Waiting,
    Paired,
    Signal { data: SignalEnvelope },
    PartnerLeft,
}
