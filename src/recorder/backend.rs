use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use super::CaptureTarget;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

/// One acquired capture source.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureTrack {
    pub id: String,
    pub kind: StreamKind,
    pub label: String,
    /// Backend-specific input description (ffmpeg input arguments for the
    /// process backend)
    pub input: Vec<String>,
    /// Filter applied to this track's frames before encoding
    pub filter: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    live: bool,
}

impl CaptureTrack {
    pub fn new(kind: StreamKind, label: impl Into<String>, input: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            input,
            filter: None,
            width: None,
            height: None,
            live: true,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn is_live(&self) -> bool {
        self.live
    }
}

/// Tracks combined for one recording.
#[derive(Debug, Default)]
pub struct MediaStream {
    tracks: Vec<CaptureTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<CaptureTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[CaptureTrack] {
        &self.tracks
    }

    pub fn video(&self) -> Option<&CaptureTrack> {
        self.tracks.iter().find(|t| t.kind == StreamKind::Video)
    }

    pub fn audio(&self) -> Option<&CaptureTrack> {
        self.tracks.iter().find(|t| t.kind == StreamKind::Audio)
    }

    /// Stop every live track through the backend. Tracks already stopped are
    /// skipped, so calling this twice releases nothing the second time.
    pub async fn release(&mut self, backend: &dyn CaptureBackend) -> usize {
        let mut released = 0;
        for track in self.tracks.iter_mut().filter(|t| t.live) {
            track.live = false;
            backend.release_track(track).await;
            released += 1;
        }
        released
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingCodec {
    Vp9,
    Vp8,
}

impl RecordingCodec {
    /// Preferred first
    pub const FALLBACK_ORDER: [RecordingCodec; 2] = [RecordingCodec::Vp9, RecordingCodec::Vp8];

    pub fn mime_type(&self) -> &'static str {
        match self {
            RecordingCodec::Vp9 => "video/webm;codecs=vp9",
            RecordingCodec::Vp8 => "video/webm;codecs=vp8",
        }
    }
}

/// Source of capture streams and encoders. Picked once when the controller
/// is built; the browser-style and native-process variants differ only here.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Acquire the screen, window or area. Failure here ends the attempt.
    async fn acquire_video(&self, target: &CaptureTarget) -> Result<CaptureTrack>;

    /// Acquire the microphone.
    async fn acquire_audio(&self) -> Result<CaptureTrack>;

    /// Stop one track. Called at most once per track.
    async fn release_track(&self, track: &CaptureTrack);

    /// Build an encoder for `stream`. Fails if `codec` is unavailable.
    async fn create_encoder(
        &self,
        stream: &MediaStream,
        codec: RecordingCodec,
    ) -> Result<Box<dyn ChunkEncoder>>;
}

/// Incremental encoder emitting container fragments.
#[async_trait]
pub trait ChunkEncoder: Send {
    /// Begin encoding, sending one chunk per `timeslice` to `chunks`. Returns
    /// once encoding is actually running.
    async fn start(
        &mut self,
        timeslice: Duration,
        chunks: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<()>;

    async fn pause(&mut self) -> Result<()>;

    async fn resume(&mut self) -> Result<()>;

    /// Stop encoding. A final chunk may still be delivered after this
    /// returns; the sender is dropped after the last one.
    async fn stop(&mut self) -> Result<()>;

    fn is_active(&self) -> bool;
}
