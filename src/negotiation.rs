//! Session negotiation state machine
//!
//! One [`Negotiation`] exists per pairing. It owns the media transport,
//! exchanges offer/answer/candidate envelopes through a [`SignalSink`] and
//! tracks which messages are acceptable in its current [`NegotiationState`].
//!
//! Role resolution: both sides are created as would-be offerers. The local
//! offer is only dispatched when the controller is idle, so an `Offer` that is
//! already queued turns this side into the answerer. Once our own offer went
//! out, a remote `Offer` is glare and ends the negotiation.
//!
//! Every method runs in the controller's serial context; nothing here locks.

use tracing::{debug, info, warn};

use crate::error::{NegotiationError, TransportError};
use crate::model::{LocalMedia, RemoteMedia, SdpType, SessionDescription, SignalEnvelope, SignalKind};
use crate::signaling::{SignalSink, Subscription};
use crate::transport::{Connectivity, MediaTransport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Transport built, tracks attached, no description exchanged yet.
    New,
    /// Local offer created and applied, not yet handed to the relay.
    LocalOfferPending,
    /// Local offer sent, waiting for the answer.
    AwaitingRemote,
    /// Both descriptions applied; ICE is checking.
    Connecting,
    Connected,
    Closed,
}

/// Observable outcome of a transport event.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    None,
    RemoteMedia(RemoteMedia),
    Connected,
    /// Connectivity dropped while connected; the transport may recover.
    Interrupted,
}

pub struct Negotiation<T: MediaTransport> {
    subscription: Subscription,
    state: NegotiationState,
    transport: Option<T>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    offers_sent: u32,
    /// Media has flowed at least once; the handshake is over for good.
    established: bool,
}

impl<T: MediaTransport> Negotiation<T> {
    /// Takes ownership of `transport` and attaches every local track to it.
    ///
    /// Events of the transport are pulled through [`Negotiation::next_event`];
    /// dropping or closing the negotiation detaches them.
    pub fn new(
        subscription: Subscription,
        mut transport: T,
        local_media: &LocalMedia,
    ) -> Result<Self, NegotiationError> {
        for track in &local_media.tracks {
            if let Err(e) = transport.attach(&local_media.stream_id, track) {
                transport.close();
                return Err(e.into());
            }
        }
        debug!(
            ?subscription,
            tracks = local_media.tracks.len(),
            "Negotiation created"
        );

        Ok(Self {
            subscription,
            state: NegotiationState::New,
            transport: Some(transport),
            local_description: None,
            remote_description: None,
            offers_sent: 0,
            established: false,
        })
    }

    pub fn subscription(&self) -> Subscription {
        self.subscription
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == NegotiationState::Closed
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn offers_sent(&self) -> u32 {
        self.offers_sent
    }

    /// True while this side should still originate the offer.
    pub fn wants_offer(&self) -> bool {
        self.state == NegotiationState::New && self.remote_description.is_none()
    }

    /// Creates, applies and sends the local offer if this side still originates it.
    pub fn dispatch_offer(&mut self, sink: &impl SignalSink) -> Result<(), NegotiationError> {
        if !self.wants_offer() {
            return Ok(());
        }

        let offer = self.with_transport(|t| t.create_offer())?;
        self.local_description = Some(offer.clone());
        self.state = NegotiationState::LocalOfferPending;

        self.send(sink, SignalEnvelope::offer(&offer))?;
        self.offers_sent += 1;
        self.state = NegotiationState::AwaitingRemote;
        info!("📤 Sent offer");
        Ok(())
    }

    /// Applies one envelope from the partner.
    pub fn handle_signal(
        &mut self,
        envelope: SignalEnvelope,
        sink: &impl SignalSink,
    ) -> Result<(), NegotiationError> {
        if self.is_closed() {
            debug!(kind = ?envelope.kind, "Dropping signal for closed negotiation");
            return Ok(());
        }

        match envelope.kind {
            SignalKind::Offer => self.on_offer(&envelope, sink),
            SignalKind::Answer => self.on_answer(&envelope),
            SignalKind::IceCandidate => {
                self.on_candidate(&envelope);
                Ok(())
            }
        }
    }

    fn on_offer(
        &mut self,
        envelope: &SignalEnvelope,
        sink: &impl SignalSink,
    ) -> Result<(), NegotiationError> {
        match self.state {
            NegotiationState::New => {}
            NegotiationState::LocalOfferPending | NegotiationState::AwaitingRemote => {
                return Err(self.violation("offer received after our own offer was sent"));
            }
            _ => return Err(self.violation("offer received on an established negotiation")),
        }

        let offer = envelope
            .session_description(SdpType::Offer)
            .map_err(|e| self.violation(&format!("malformed offer: {e}")))?;
        info!("📥 Received offer");

        let answer = self.with_transport(|t| t.accept_offer(&offer))?;
        self.remote_description = Some(offer);
        self.local_description = Some(answer.clone());

        self.send(sink, SignalEnvelope::answer(&answer))?;
        self.state = NegotiationState::Connecting;
        info!("📤 Sent answer");
        Ok(())
    }

    fn on_answer(&mut self, envelope: &SignalEnvelope) -> Result<(), NegotiationError> {
        if !matches!(
            self.state,
            NegotiationState::LocalOfferPending | NegotiationState::AwaitingRemote
        ) {
            warn!(state = ?self.state, "Dropping unexpected answer");
            return Ok(());
        }

        let answer = envelope
            .session_description(SdpType::Answer)
            .map_err(|e| self.violation(&format!("malformed answer: {e}")))?;
        info!("📥 Received answer");

        self.with_transport(|t| t.accept_answer(&answer))?;
        self.remote_description = Some(answer);
        self.state = NegotiationState::Connecting;
        Ok(())
    }

    /// Candidates never change the state; a bad one is logged and skipped.
    fn on_candidate(&mut self, envelope: &SignalEnvelope) {
        let candidate = match envelope.ice_candidate() {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("Ignoring malformed candidate: {}", e);
                return;
            }
        };

        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.add_remote_candidate(&candidate) {
                warn!("Error adding ICE candidate: {}", e);
            }
        }
    }

    /// Waits for the next transport event; pending forever once closed.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        match self.transport.as_mut() {
            Some(transport) => transport.next_event().await,
            None => std::future::pending().await,
        }
    }

    /// Applies one transport event.
    pub fn handle_transport_event(
        &mut self,
        event: TransportEvent,
        sink: &impl SignalSink,
    ) -> Result<Progress, NegotiationError> {
        if self.is_closed() {
            return Ok(Progress::None);
        }

        match event {
            TransportEvent::LocalCandidate(candidate) => {
                // Trickled right away, never batched.
                self.send(sink, SignalEnvelope::candidate(&candidate))?;
                Ok(Progress::None)
            }
            TransportEvent::RemoteMedia(media) => {
                info!(mid = %media.mid, kind = %media.kind, "Remote track arrived");
                Ok(Progress::RemoteMedia(media))
            }
            TransportEvent::Connectivity(Connectivity::Checking) => Ok(Progress::None),
            TransportEvent::Connectivity(Connectivity::Connected) => {
                if self.state != NegotiationState::Connecting {
                    debug!(state = ?self.state, "Ignoring connectivity outside of Connecting");
                    return Ok(Progress::None);
                }
                self.state = NegotiationState::Connected;
                self.established = true;
                info!("✅ Media path established");
                Ok(Progress::Connected)
            }
            TransportEvent::Connectivity(Connectivity::Disconnected) => {
                if self.state != NegotiationState::Connected {
                    return Ok(Progress::None);
                }
                warn!("Connectivity lost, waiting for the transport to recover");
                self.state = NegotiationState::Connecting;
                Ok(Progress::Interrupted)
            }
            TransportEvent::Connectivity(Connectivity::Failed) => {
                self.close();
                Err(NegotiationError::Transport(TransportError::Failed))
            }
        }
    }

    /// The relay connection went away. Fatal unless the handshake completed.
    pub fn handle_channel_loss(&mut self) -> Result<(), NegotiationError> {
        if self.is_closed() {
            return Ok(());
        }
        if self.established {
            warn!(state = ?self.state, "Relay lost after the handshake, keeping the media path");
            return Ok(());
        }
        self.close();
        Err(NegotiationError::ChannelLoss)
    }

    /// Releases the transport and detaches local tracks. Idempotent.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.state = NegotiationState::Closed;
        debug!(subscription = ?self.subscription, "Negotiation closed");
    }

    fn send(
        &mut self,
        sink: &impl SignalSink,
        envelope: SignalEnvelope,
    ) -> Result<(), NegotiationError> {
        if sink.send(envelope).is_ok() {
            return Ok(());
        }
        if self.established {
            warn!("Relay unavailable, dropping envelope");
            return Ok(());
        }
        self.close();
        Err(NegotiationError::ChannelLoss)
    }

    fn with_transport<R>(
        &mut self,
        f: impl FnOnce(&mut T) -> Result<R, TransportError>,
    ) -> Result<R, NegotiationError> {
        let result = match self.transport.as_mut() {
            Some(transport) => f(transport),
            None => Err(TransportError::Closed),
        };
        result.map_err(|e| {
            self.close();
            NegotiationError::Transport(e)
        })
    }

    fn violation(&mut self, reason: &str) -> NegotiationError {
        self.close();
        NegotiationError::ProtocolViolation(reason.to_string())
    }
}

impl<T: MediaTransport> Drop for Negotiation<T> {
    fn drop(&mut self) {
        self.close();
    }
}
