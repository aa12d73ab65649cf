//! Capture and rendering collaborators
//!
//! The controller only sees these two traits. The binary plugs in
//! [`SyntheticCapture`] and [`LogRenderer`], which stand in for a real camera
//! and display.

use async_trait::async_trait;
use tracing::info;

use crate::error::MediaAccessError;
use crate::model::{LocalMedia, MediaKind, RemoteMedia};

#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Acquires the local capture. Called once per client.
    async fn acquire(&self) -> Result<LocalMedia, MediaAccessError>;
}

pub trait MediaRenderer: Send + Sync {
    fn on_local_media(&self, media: &LocalMedia);
    fn on_remote_media(&self, media: RemoteMedia);
}

/// Pretends to open the selected devices.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticCapture {
    pub audio: bool,
    pub video: bool,
}

#[async_trait]
impl MediaCapture for SyntheticCapture {
    async fn acquire(&self) -> Result<LocalMedia, MediaAccessError> {
        if !self.audio && !self.video {
            return Err(MediaAccessError("no audio or video track selected".into()));
        }

        let stream_id = format!("local-{:08x}", rand::random::<u32>());
        let mut media = LocalMedia::new(stream_id);
        if self.audio {
            media = media.with_track(MediaKind::Audio);
        }
        if self.video {
            media = media.with_track(MediaKind::Video);
        }
        Ok(media)
    }
}

/// Logs media handles instead of drawing them.
#[derive(Debug, Default)]
pub struct LogRenderer;

impl MediaRenderer for LogRenderer {
    fn on_local_media(&self, media: &LocalMedia) {
        info!(
            stream = %media.stream_id,
            tracks = media.tracks.len(),
            "🎥 Local preview ready"
        );
    }

    fn on_remote_media(&self, media: RemoteMedia) {
        info!(mid = %media.mid, kind = %media.kind, "🎬 Rendering remote media");
    }
}
