//! In-memory transport for tests
//!
//! Produces two host candidates up front, reports the partner's media once a
//! remote description is applied and, with `auto_connect`, declares ICE
//! connected as soon as it holds a remote description and a remote candidate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Connectivity, MediaTransport, TransportEvent, TransportFactory};
use crate::error::TransportError;
use crate::model::{
    IceCandidate, LocalTrack, MediaKind, RemoteMedia, SdpType, SessionDescription,
    TraversalConfig,
};

/// Counters shared with the test that created the transport.
#[derive(Debug, Default)]
pub struct Probe {
    pub attached: AtomicUsize,
    pub closes: AtomicUsize,
    pub remote_candidates: AtomicUsize,
}

pub struct FakeTransport {
    label: String,
    auto_connect: bool,
    probe: Arc<Probe>,
    tracks: Vec<LocalTrack>,
    events: VecDeque<TransportEvent>,
    offered: bool,
    has_remote: bool,
    remote_candidates: usize,
    connected: bool,
    closed: bool,
}

impl FakeTransport {
    pub fn new(label: &str, auto_connect: bool) -> Self {
        let events = (1..=2)
            .map(|n| {
                TransportEvent::LocalCandidate(IceCandidate::new(format!(
                    "candidate:{n} 1 udp 2130706431 10.0.0.{n} 500{n} typ host"
                )))
            })
            .collect();

        Self {
            label: label.to_string(),
            auto_connect,
            probe: Arc::new(Probe::default()),
            tracks: vec![],
            events,
            offered: false,
            has_remote: false,
            remote_candidates: 0,
            connected: false,
            closed: false,
        }
    }

    pub fn probe(&self) -> Arc<Probe> {
        Arc::clone(&self.probe)
    }

    fn remote_applied(&mut self) {
        self.has_remote = true;
        self.events.push_back(TransportEvent::RemoteMedia(RemoteMedia {
            mid: "0".to_string(),
            kind: MediaKind::Audio,
        }));
        self.maybe_connect();
    }

    fn maybe_connect(&mut self) {
        if self.auto_connect && !self.connected && self.has_remote && self.remote_candidates > 0 {
            self.connected = true;
            self.events
                .push_back(TransportEvent::Connectivity(Connectivity::Checking));
            self.events
                .push_back(TransportEvent::Connectivity(Connectivity::Connected));
        }
    }

    fn description(&self, sdp_type: SdpType) -> SessionDescription {
        SessionDescription {
            sdp_type,
            sdp: format!("v=0 {} tracks={}", self.label, self.tracks.len()),
        }
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    fn attach(&mut self, _stream_id: &str, track: &LocalTrack) -> Result<(), TransportError> {
        self.tracks.push(track.clone());
        self.probe.attached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_offer(&mut self) -> Result<SessionDescription, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.offered = true;
        Ok(self.description(SdpType::Offer))
    }

    fn accept_offer(
        &mut self,
        _offer: &SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.remote_applied();
        Ok(self.description(SdpType::Answer))
    }

    fn accept_answer(&mut self, _answer: &SessionDescription) -> Result<(), TransportError> {
        if !self.offered {
            return Err(TransportError::Sdp("no outstanding offer".into()));
        }
        self.remote_applied();
        Ok(())
    }

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), TransportError> {
        if !candidate.candidate.starts_with("candidate:") {
            return Err(TransportError::Candidate(candidate.candidate.clone()));
        }
        self.remote_candidates += 1;
        self.probe.remote_candidates.fetch_add(1, Ordering::SeqCst);
        self.maybe_connect();
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }
        if self.closed {
            return None;
        }
        std::future::pending().await
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.events.clear();
        self.tracks.clear();
        self.probe.attached.store(0, Ordering::SeqCst);
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out [`FakeTransport`]s, optionally after a delay.
pub struct FakeFactory {
    pub label: String,
    pub auto_connect: bool,
    pub delay: Option<Duration>,
    pub opened: Arc<AtomicUsize>,
    pub probes: Arc<std::sync::Mutex<Vec<Arc<Probe>>>>,
}

impl FakeFactory {
    pub fn new(label: &str, auto_connect: bool) -> Self {
        Self {
            label: label.to_string(),
            auto_connect,
            delay: None,
            opened: Arc::new(AtomicUsize::new(0)),
            probes: Arc::new(std::sync::Mutex::new(vec![])),
        }
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    type Transport = FakeTransport;

    async fn open(&self, _config: &TraversalConfig) -> Result<FakeTransport, TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let transport = FakeTransport::new(&self.label, self.auto_connect);
        self.probes.lock().unwrap().push(transport.probe());
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(transport)
    }
}
