//! str0m media transport
//!
//! str0m is sans-IO: this module owns the UDP socket and drives the [`Rtc`]
//! instance from [`MediaTransport::next_event`], the same poll-output /
//! handle-input loop a standalone str0m peer runs, folded into a cancel-safe
//! future so the controller can `select!` on it next to the relay.
//!
//! Candidates: the host candidate of the bound socket is trickled first; a
//! server-reflexive candidate follows for every STUN server that answers our
//! binding request on that same socket. TURN relays are not allocated.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use async_trait::async_trait;
use str0m::change::{SdpAnswer, SdpOffer, SdpPendingOffer};
use str0m::media::{Direction, MediaKind as RtcMediaKind, Mid};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::stun::{self, TransactionId};
use super::{Connectivity, MediaTransport, TransportEvent, TransportFactory};
use crate::error::TransportError;
use crate::model::{
    IceCandidate, LocalTrack, MediaKind, RemoteMedia, SdpType, SessionDescription,
    TraversalConfig,
};
use crate::util::select_host_address;

/// Label of the data channel added to every offer, so an offer is never empty.
const DATA_CHANNEL: &str = "pair-rtc";
const DEFAULT_STUN_PORT: u16 = 3478;

/// Opens one [`RtcTransport`] per negotiation.
pub struct RtcTransportFactory {
    bind_ip: Option<IpAddr>,
}

impl RtcTransportFactory {
    /// `bind_ip` overrides the automatically selected host address.
    pub fn new(bind_ip: Option<IpAddr>) -> Self {
        Self { bind_ip }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    type Transport = RtcTransport;

    async fn open(&self, config: &TraversalConfig) -> Result<RtcTransport, TransportError> {
        let ip = match self.bind_ip {
            Some(ip) => ip,
            None => select_host_address()
                .ok_or_else(|| TransportError::Setup("found no usable network interface".into()))?,
        };

        let socket = UdpSocket::bind(SocketAddr::new(ip, 0)).await?;
        let local_addr = socket.local_addr()?;
        info!("Bound UDP port: {}", local_addr);

        let mut transport = RtcTransport::new(socket, local_addr);

        let host = Candidate::host(local_addr, Protocol::Udp)
            .map_err(|e| TransportError::Setup(format!("host candidate: {e:?}")))?;
        transport.add_local_candidate(host);

        if config.has_relay() {
            info!("TURN servers configured but relay allocation is not supported, skipping them");
        }
        for url in config.stun_urls() {
            transport.query_reflexive(url).await;
        }

        Ok(transport)
    }
}

/// A str0m peer connection bound to its own UDP socket.
pub struct RtcTransport {
    rtc: Rtc,
    socket: UdpSocket,
    local_addr: SocketAddr,
    stream_id: Option<String>,
    tracks: Vec<LocalTrack>,
    /// Local track id sending on each media line
    bound: HashMap<Mid, String>,
    /// Media lines of our outstanding offer
    offered: Vec<(Mid, MediaKind)>,
    /// Media lines already reported as remote media
    reported: HashSet<Mid>,
    pending_offer: Option<SdpPendingOffer>,
    stun_requests: HashMap<TransactionId, String>,
    events: VecDeque<TransportEvent>,
    buf: Vec<u8>,
    closed: bool,
}

impl RtcTransport {
    fn new(socket: UdpSocket, local_addr: SocketAddr) -> Self {
        Self {
            rtc: Rtc::builder().build(),
            socket,
            local_addr,
            stream_id: None,
            tracks: vec![],
            bound: HashMap::new(),
            offered: vec![],
            reported: HashSet::new(),
            pending_offer: None,
            stun_requests: HashMap::new(),
            events: VecDeque::new(),
            buf: vec![0; 2000],
            closed: false,
        }
    }

    fn add_local_candidate(&mut self, candidate: Candidate) {
        let line = candidate.to_sdp_string();
        if self.rtc.add_local_candidate(candidate).is_some() {
            debug!("Gathered local candidate: {}", line);
            self.events
                .push_back(TransportEvent::LocalCandidate(IceCandidate::new(line)));
        }
    }

    /// Sends a binding request to the STUN server behind `url`. The answer is
    /// picked up by the socket reader in [`MediaTransport::next_event`].
    async fn query_reflexive(&mut self, url: &str) {
        let Some(authority) = stun_authority(url) else {
            warn!("Ignoring malformed STUN url: {}", url);
            return;
        };

        let server = match tokio::net::lookup_host(authority.as_str()).await {
            Ok(mut addrs) => addrs.find(|a| a.is_ipv4() == self.local_addr.is_ipv4()),
            Err(e) => {
                warn!("Could not resolve STUN server {}: {}", authority, e);
                return;
            }
        };
        let Some(server) = server else {
            warn!("STUN server {} has no address in our family", authority);
            return;
        };

        let transaction: TransactionId = rand::random();
        match self
            .socket
            .send_to(&stun::binding_request(&transaction), server)
            .await
        {
            Ok(_) => {
                debug!("Sent STUN binding request to {} ({})", authority, server);
                self.stun_requests.insert(transaction, authority);
            }
            Err(e) => warn!("STUN request to {} failed: {}", server, e),
        }
    }

    fn add_reflexive(&mut self, mapped: Option<SocketAddr>, server: &str) {
        let Some(addr) = mapped else {
            warn!("STUN reply from {} carried no mapped address", server);
            return;
        };
        if addr == self.local_addr {
            debug!("Not behind a NAT according to {}", server);
            return;
        }
        match Candidate::server_reflexive(addr, self.local_addr, Protocol::Udp) {
            Ok(candidate) => self.add_local_candidate(candidate),
            Err(e) => warn!("Unusable reflexive address {}: {:?}", addr, e),
        }
    }

    fn report_remote(&mut self, mid: Mid, kind: MediaKind) {
        if self.reported.insert(mid) {
            self.events
                .push_back(TransportEvent::RemoteMedia(RemoteMedia {
                    mid: mid.to_string(),
                    kind,
                }));
        }
    }

    /// Sends the first unbound local track of `kind` on a line the partner offered.
    fn bind_track(&mut self, mid: Mid, kind: MediaKind) {
        if self.bound.contains_key(&mid) {
            return;
        }
        let Some(id) = self
            .tracks
            .iter()
            .find(|t| t.kind == kind && !self.bound.values().any(|bound| bound == &t.id))
            .map(|t| t.id.clone())
        else {
            debug!(%mid, %kind, "No local track to send on offered line");
            return;
        };
        debug!(%mid, track = %id, "Bound local track");
        self.bound.insert(mid, id);
    }

    /// Marks the connection dead; the negotiation sees `Failed` next.
    fn fail(&mut self) {
        self.rtc.disconnect();
        self.events
            .push_back(TransportEvent::Connectivity(Connectivity::Failed));
        self.closed = true;
    }

    /// Polls str0m until it asks for a timeout, transmitting and translating
    /// everything it produces on the way.
    fn drive(&mut self) -> Option<Instant> {
        loop {
            if !self.rtc.is_alive() {
                self.fail();
                return None;
            }

            match self.rtc.poll_output() {
                Ok(Output::Timeout(t)) => return Some(t),
                Ok(Output::Transmit(transmit)) => {
                    if let Err(e) = self
                        .socket
                        .try_send_to(&transmit.contents, transmit.destination)
                    {
                        debug!("Dropped datagram to {}: {}", transmit.destination, e);
                    }
                }
                Ok(Output::Event(event)) => self.translate(event),
                Err(e) => {
                    warn!("poll_output failed: {:?}", e);
                    self.fail();
                    return None;
                }
            }
        }
    }

    fn translate(&mut self, event: Event) {
        match event {
            Event::IceConnectionStateChange(state) => {
                info!("🔌 ICE Connection State: {:?}", state);
                let connectivity = match state {
                    IceConnectionState::New => return,
                    IceConnectionState::Checking => Connectivity::Checking,
                    IceConnectionState::Connected | IceConnectionState::Completed => {
                        Connectivity::Connected
                    }
                    IceConnectionState::Disconnected => Connectivity::Disconnected,
                };
                self.events
                    .push_back(TransportEvent::Connectivity(connectivity));
            }
            // Only raised for lines the partner offered.
            Event::MediaAdded(added) => {
                let kind = match added.kind {
                    RtcMediaKind::Audio => MediaKind::Audio,
                    RtcMediaKind::Video => MediaKind::Video,
                };
                self.bind_track(added.mid, kind);
                self.report_remote(added.mid, kind);
            }
            Event::ChannelOpen(id, label) => {
                debug!("Data channel '{}' ({:?}) is open", label, id);
            }
            _ => {}
        }
    }

    fn receive(&mut self, n: usize, source: SocketAddr) {
        if let Some(transaction) = stun::binding_success_transaction(&self.buf[..n]) {
            if let Some(server) = self.stun_requests.remove(&transaction) {
                let mapped = stun::mapped_address(&self.buf[..n]);
                self.add_reflexive(mapped, &server);
                return;
            }
        }

        // Parse data to a DatagramRecv, which demultiplexes STUN/DTLS/RTP.
        let Ok(contents) = self.buf[..n].try_into() else {
            debug!("Ignoring unrecognised datagram from {}", source);
            return;
        };

        let input = Input::Receive(
            Instant::now(),
            Receive {
                proto: Protocol::Udp,
                source,
                destination: self.local_addr,
                contents,
            },
        );

        if let Err(e) = self.rtc.handle_input(input) {
            warn!("Rtc rejected input from {}: {:?}", source, e);
            self.fail();
        }
    }

    fn handle_timeout(&mut self) {
        if let Err(e) = self.rtc.handle_input(Input::Timeout(Instant::now())) {
            warn!("Rtc timeout handling failed: {:?}", e);
            self.fail();
        }
    }
}

#[async_trait]
impl MediaTransport for RtcTransport {
    fn attach(&mut self, stream_id: &str, track: &LocalTrack) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.stream_id.get_or_insert_with(|| stream_id.to_string());
        self.tracks.push(track.clone());
        Ok(())
    }

    fn create_offer(&mut self) -> Result<SessionDescription, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let mut lines = vec![];
        let mut change = self.rtc.sdp_api();
        change.add_channel(DATA_CHANNEL.to_string());
        for track in &self.tracks {
            let kind = match track.kind {
                MediaKind::Audio => RtcMediaKind::Audio,
                MediaKind::Video => RtcMediaKind::Video,
            };
            let mid = change.add_media(
                kind,
                Direction::SendRecv,
                self.stream_id.clone(),
                Some(track.id.clone()),
                None,
            );
            lines.push((mid, track.kind, track.id.clone()));
        }

        let (offer, pending) = change
            .apply()
            .ok_or_else(|| TransportError::Sdp("nothing to offer".into()))?;
        self.pending_offer = Some(pending);
        self.offered.clear();
        for (mid, kind, id) in lines {
            self.bound.insert(mid, id);
            self.offered.push((mid, kind));
        }

        Ok(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: offer.to_sdp_string(),
        })
    }

    /// The answer mirrors the offered lines. Attached tracks are bound to
    /// those lines by kind as str0m reports each one.
    fn accept_offer(
        &mut self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let offer = SdpOffer::from_sdp_string(&offer.sdp)
            .map_err(|e| TransportError::Sdp(format!("{e:?}")))?;
        let answer = self
            .rtc
            .sdp_api()
            .accept_offer(offer)
            .map_err(|e| TransportError::Sdp(format!("{e:?}")))?;

        Ok(SessionDescription {
            sdp_type: SdpType::Answer,
            sdp: answer.to_sdp_string(),
        })
    }

    fn accept_answer(&mut self, answer: &SessionDescription) -> Result<(), TransportError> {
        let pending = self
            .pending_offer
            .take()
            .ok_or_else(|| TransportError::Sdp("no outstanding offer".into()))?;

        let answer = SdpAnswer::from_sdp_string(&answer.sdp)
            .map_err(|e| TransportError::Sdp(format!("{e:?}")))?;
        self.rtc
            .sdp_api()
            .accept_answer(pending, answer)
            .map_err(|e| TransportError::Sdp(format!("{e:?}")))?;

        // str0m raises no MediaAdded for lines we offered ourselves.
        for (mid, kind) in std::mem::take(&mut self.offered) {
            let receiving = self.rtc.media(mid).is_some_and(|media| {
                matches!(media.direction(), Direction::SendRecv | Direction::RecvOnly)
            });
            if receiving {
                self.report_remote(mid, kind);
            }
        }
        Ok(())
    }

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), TransportError> {
        let line = candidate
            .candidate
            .strip_prefix("a=")
            .unwrap_or(&candidate.candidate);
        let candidate = Candidate::from_sdp_string(line)
            .map_err(|e| TransportError::Candidate(format!("{e:?}")))?;
        self.rtc.add_remote_candidate(candidate);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            if self.closed {
                return None;
            }

            let Some(deadline) = self.drive() else {
                continue;
            };
            if !self.events.is_empty() {
                continue;
            }

            tokio::select! {
                received = self.socket.recv_from(&mut self.buf) => match received {
                    Ok((n, source)) => self.receive(n, source),
                    Err(e) if matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused) => {
                        debug!("Ignoring ICMP error on UDP socket: {}", e);
                    }
                    Err(e) => {
                        warn!("UdpSocket read failed: {}", e);
                        self.fail();
                    }
                },
                _ = tokio::time::sleep_until(deadline.into()) => self.handle_timeout(),
            }
        }
    }

    fn close(&mut self) {
        self.rtc.disconnect();
        self.tracks.clear();
        self.bound.clear();
        self.offered.clear();
        self.reported.clear();
        self.pending_offer = None;
        self.stun_requests.clear();
        self.events.clear();
        self.closed = true;
    }
}

/// `stun:host[:port][?query]` to `host:port`.
fn stun_authority(url: &str) -> Option<String> {
    let rest = url.strip_prefix("stun:")?;
    let rest = rest.split('?').next().unwrap_or(rest).trim();
    if rest.is_empty() {
        return None;
    }

    // Bracketed IPv6 literals carry their own colons.
    let has_port = match rest.rfind(']') {
        Some(end) => rest[end..].contains(':'),
        None => rest.contains(':'),
    };
    if has_port {
        Some(rest.to_string())
    } else {
        Some(format!("{rest}:{DEFAULT_STUN_PORT}"))
    }
}
