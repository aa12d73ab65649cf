//! Media handles
//!
//! Capture and rendering live outside this crate. These types are the opaque
//! handles passed across that boundary: the negotiation borrows the local
//! handle to attach its tracks and hands remote handles to the renderer.

use std::fmt;

/// The kind of media (audio or video)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// One captured track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    /// Track identifier, unique within its stream
    pub id: String,
    pub kind: MediaKind,
}

/// Handle to the local capture. Owned by the capture collaborator and outlives
/// every negotiation it is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMedia {
    /// Stream identifier announced in the session description
    pub stream_id: String,
    pub tracks: Vec<LocalTrack>,
}

impl LocalMedia {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks: vec![],
        }
    }

    pub fn with_track(mut self, kind: MediaKind) -> Self {
        let id = format!("{}-{}", kind, self.tracks.len());
        self.tracks.push(LocalTrack { id, kind });
        self
    }
}

/// Handle to one incoming track from the partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMedia {
    /// Media line identifier the track arrived on
    pub mid: String,
    pub kind: MediaKind,
}
