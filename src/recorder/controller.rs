use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::backend::{CaptureBackend, ChunkEncoder, MediaStream, RecordingCodec};
use super::CaptureTarget;
use crate::config::RecorderConfig;
use crate::editor::{CursorPoint, MediaItem, MediaKind};
use crate::error::{ReelError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct RecorderSettings {
    pub target: CaptureTarget,
    pub microphone: bool,
    pub timeslice: Duration,
    /// How long `finish` waits for chunks emitted after stop
    pub finish_grace: Duration,
    /// Pause between releasing the old stream and acquiring a new one
    pub restart_settle: Duration,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self::from(&RecorderConfig::default())
    }
}

impl From<&RecorderConfig> for RecorderSettings {
    fn from(config: &RecorderConfig) -> Self {
        Self {
            target: CaptureTarget::from_config(config.mode, config.source.as_deref()),
            microphone: config.microphone,
            // interval timers reject a zero period
            timeslice: Duration::from_millis(config.timeslice_ms.max(1)),
            finish_grace: Duration::from_millis(config.finish_grace_ms),
            restart_settle: Duration::from_millis(config.restart_settle_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Acquiring,
    Recording,
    Paused,
    Stopping,
    Finished,
    Cancelled,
}

impl RecordingState {
    fn can_start(&self) -> bool {
        matches!(
            self,
            RecordingState::Idle | RecordingState::Finished | RecordingState::Cancelled
        )
    }

    fn label(&self) -> &'static str {
        match self {
            RecordingState::Idle => "idle",
            RecordingState::Acquiring => "acquiring",
            RecordingState::Recording => "recording",
            RecordingState::Paused => "paused",
            RecordingState::Stopping => "stopping",
            RecordingState::Finished => "finished",
            RecordingState::Cancelled => "cancelled",
        }
    }
}

/// A finished recording: encoder chunks in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedArtifact {
    pub mime_type: String,
    pub chunks: Vec<Vec<u8>>,
    pub duration: Duration,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub cursor_trace: Vec<CursorPoint>,
}

impl RecordedArtifact {
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The container bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.chunks.concat()
    }

    /// Describe the recording as an editor media item stored at `location`.
    pub fn to_media_item(&self, name: impl Into<String>, location: impl Into<String>) -> MediaItem {
        let mut item = MediaItem::new(
            MediaKind::Video,
            name,
            location,
            self.duration.as_secs_f64(),
        );
        item.width = self.width;
        item.height = self.height;
        item.size = self.len() as u64;
        if !self.cursor_trace.is_empty() {
            item.cursor_trace = Some(self.cursor_trace.clone());
        }
        item
    }
}

/// Drives one capture session at a time.
///
/// The controller exclusively owns the acquired stream and the encoder.
/// Every exit path (`finish`, `cancel`, `restart`) releases the stream
/// exactly once.
pub struct RecordingController {
    backend: Arc<dyn CaptureBackend>,
    settings: RecorderSettings,
    state: RecordingState,
    stream: Option<MediaStream>,
    encoder: Option<Box<dyn ChunkEncoder>>,
    codec: Option<RecordingCodec>,
    chunk_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    chunks: Vec<Vec<u8>>,
    base_time: Option<Instant>,
    paused_elapsed: Duration,
    cursor_trace: Vec<CursorPoint>,
}

impl RecordingController {
    pub fn new(backend: Arc<dyn CaptureBackend>, settings: RecorderSettings) -> Self {
        Self {
            backend,
            settings,
            state: RecordingState::Idle,
            stream: None,
            encoder: None,
            codec: None,
            chunk_rx: None,
            chunks: Vec::new(),
            base_time: None,
            paused_elapsed: Duration::ZERO,
            cursor_trace: Vec::new(),
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub fn set_target(&mut self, target: CaptureTarget) {
        self.settings.target = target;
    }

    pub fn codec(&self) -> Option<RecordingCodec> {
        self.codec
    }

    pub fn stream(&self) -> Option<&MediaStream> {
        self.stream.as_ref()
    }

    /// Chunks received so far
    pub fn chunk_count(&mut self) -> usize {
        self.drain_pending();
        self.chunks.len()
    }

    /// Time shown on the recording timer; frozen while paused.
    pub fn elapsed(&self) -> Duration {
        match (self.state, self.base_time) {
            (RecordingState::Recording, Some(base)) => base.elapsed(),
            (RecordingState::Paused, _) => self.paused_elapsed,
            _ => Duration::ZERO,
        }
    }

    pub async fn start_recording(&mut self) -> Result<()> {
        if !self.state.can_start() {
            return Err(self.invalid_state("start recording"));
        }
        self.reset_session();
        self.state = RecordingState::Acquiring;
        tracing::debug!(target = ?self.settings.target, "acquiring capture stream");

        let video = match self.backend.acquire_video(&self.settings.target).await {
            Ok(track) => track,
            Err(e) => {
                self.state = RecordingState::Idle;
                tracing::warn!(error = %e, "screen capture unavailable");
                return Err(e);
            }
        };
        let mut tracks = vec![video];
        if self.settings.microphone {
            match self.backend.acquire_audio().await {
                Ok(audio) => tracks.push(audio),
                Err(e) => tracing::warn!(error = %e, "microphone unavailable, recording without audio"),
            }
        }
        let mut stream = MediaStream::new(tracks);

        let mut encoder = None;
        let mut last_error = None;
        for codec in RecordingCodec::FALLBACK_ORDER {
            match self.backend.create_encoder(&stream, codec).await {
                Ok(e) => {
                    encoder = Some((codec, e));
                    break;
                }
                Err(e) => {
                    tracing::warn!(?codec, error = %e, "encoder construction failed");
                    last_error = Some(e);
                }
            }
        }
        let Some((codec, mut encoder)) = encoder else {
            stream.release(self.backend.as_ref()).await;
            self.state = RecordingState::Idle;
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no codec available".to_string());
            return Err(ReelError::EncoderUnavailable(reason));
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = encoder.start(self.settings.timeslice, tx).await {
            stream.release(self.backend.as_ref()).await;
            self.state = RecordingState::Idle;
            return Err(e);
        }

        // the timer starts only once the encoder is running
        self.stream = Some(stream);
        self.encoder = Some(encoder);
        self.codec = Some(codec);
        self.chunk_rx = Some(rx);
        self.base_time = Some(Instant::now());
        self.state = RecordingState::Recording;
        tracing::info!(?codec, "recording started");
        Ok(())
    }

    /// Toggle between recording and paused. Returns the new state.
    pub async fn pause_resume(&mut self) -> Result<RecordingState> {
        match self.state {
            RecordingState::Recording => {
                if let Some(encoder) = self.encoder.as_mut() {
                    encoder.pause().await?;
                }
                self.paused_elapsed = self.base_time.map(|b| b.elapsed()).unwrap_or_default();
                self.state = RecordingState::Paused;
                tracing::debug!(elapsed = ?self.paused_elapsed, "recording paused");
            }
            RecordingState::Paused => {
                if let Some(encoder) = self.encoder.as_mut() {
                    encoder.resume().await?;
                }
                self.base_time = Some(Instant::now() - self.paused_elapsed);
                self.state = RecordingState::Recording;
                tracing::debug!("recording resumed");
            }
            _ => return Err(self.invalid_state("pause or resume")),
        }
        Ok(self.state)
    }

    /// Pointer sample for the cursor trace; ignored unless recording.
    pub fn record_cursor(&mut self, x: f64, y: f64) {
        if self.state != RecordingState::Recording {
            return;
        }
        let timestamp_ms = self.elapsed().as_millis() as u64;
        self.cursor_trace.push(CursorPoint { x, y, timestamp_ms });
    }

    /// Throw the current take away and start over.
    pub async fn restart(&mut self) -> Result<()> {
        tracing::info!("restarting recording");
        self.shutdown().await;
        self.chunks.clear();
        self.reset_session();
        self.state = RecordingState::Idle;
        tokio::time::sleep(self.settings.restart_settle).await;
        self.start_recording().await
    }

    /// Stop and assemble the recording.
    ///
    /// Fails with [`ReelError::EmptyRecording`] when no chunk arrived; an
    /// empty artifact is never returned.
    pub async fn finish(&mut self) -> Result<RecordedArtifact> {
        let duration = self.elapsed();
        self.state = RecordingState::Stopping;

        if let Some(encoder) = self.encoder.as_mut() {
            if encoder.is_active() {
                if let Err(e) = encoder.stop().await {
                    tracing::warn!(error = %e, "encoder stop failed");
                }
            }
        }
        self.encoder = None;
        self.collect_trailing().await;
        let (width, height) = (self.dimension(true), self.dimension(false));
        self.release_stream().await;

        let chunks = std::mem::take(&mut self.chunks);
        let codec = self.codec.take();
        let cursor_trace = std::mem::take(&mut self.cursor_trace);
        self.reset_session();

        if chunks.is_empty() {
            self.state = RecordingState::Idle;
            tracing::warn!("recording finished without any data");
            return Err(ReelError::EmptyRecording);
        }

        self.state = RecordingState::Finished;
        let artifact = RecordedArtifact {
            mime_type: codec.unwrap_or(RecordingCodec::Vp9).mime_type().to_string(),
            chunks,
            duration,
            width,
            height,
            cursor_trace,
        };
        tracing::info!(
            chunks = artifact.chunks.len(),
            bytes = artifact.len(),
            duration = ?artifact.duration,
            "recording finished"
        );
        Ok(artifact)
    }

    /// Stop without producing anything. Always succeeds.
    pub async fn cancel(&mut self) {
        self.shutdown().await;
        self.chunks.clear();
        self.reset_session();
        self.state = RecordingState::Cancelled;
        tracing::info!("recording cancelled");
    }

    // ---- internals ----

    async fn shutdown(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            if encoder.is_active() {
                if let Err(e) = encoder.stop().await {
                    tracing::warn!(error = %e, "encoder stop failed");
                }
            }
        }
        self.chunk_rx = None;
        self.release_stream().await;
    }

    async fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let released = stream.release(self.backend.as_ref()).await;
            tracing::debug!(released, "capture tracks released");
        }
    }

    fn drain_pending(&mut self) {
        let Some(rx) = self.chunk_rx.as_mut() else {
            return;
        };
        while let Ok(chunk) = rx.try_recv() {
            if !chunk.is_empty() {
                self.chunks.push(chunk);
            }
        }
    }

    /// Receive until the encoder hangs up or the grace period runs out
    async fn collect_trailing(&mut self) {
        let Some(mut rx) = self.chunk_rx.take() else {
            return;
        };
        let deadline = Instant::now() + self.settings.finish_grace;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(chunk)) => {
                    if !chunk.is_empty() {
                        self.chunks.push(chunk);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!("grace period elapsed before encoder closed");
                    break;
                }
            }
        }
    }

    fn dimension(&self, width: bool) -> Option<u32> {
        let video = self.stream.as_ref()?.video()?;
        if width {
            video.width
        } else {
            video.height
        }
    }

    fn reset_session(&mut self) {
        self.base_time = None;
        self.paused_elapsed = Duration::ZERO;
        self.cursor_trace.clear();
        self.chunk_rx = None;
    }

    fn invalid_state(&self, action: &str) -> ReelError {
        ReelError::InvalidRecorderState {
            action: action.to_string(),
            state: self.state.label().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::backend::{CaptureTrack, StreamKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Sender = Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>;

    #[derive(Default)]
    struct Stub {
        deny_video: bool,
        deny_audio: bool,
        broken_codecs: Vec<RecordingCodec>,
        trailing_chunk: Option<Vec<u8>>,
        acquired: AtomicUsize,
        released: AtomicUsize,
        sender: Sender,
    }

    impl Stub {
        fn emit(&self, chunk: &[u8]) {
            let guard = self.sender.lock().unwrap();
            guard.as_ref().unwrap().send(chunk.to_vec()).unwrap();
        }
    }

    struct StubEncoder {
        sender: Sender,
        trailing: Option<Vec<u8>>,
        active: bool,
    }

    #[async_trait]
    impl ChunkEncoder for StubEncoder {
        async fn start(&mut self, _: Duration, chunks: mpsc::UnboundedSender<Vec<u8>>) -> Result<()> {
            *self.sender.lock().unwrap() = Some(chunks);
            self.active = true;
            Ok(())
        }

        async fn pause(&mut self) -> Result<()> {
            Ok(())
        }

        async fn resume(&mut self) -> Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.active = false;
            let sender = self.sender.lock().unwrap().take();
            if let (Some(tx), Some(last)) = (sender, self.trailing.take()) {
                // the final chunk lands after stop() has returned
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let _ = tx.send(last);
                });
            }
            Ok(())
        }

        fn is_active(&self) -> bool {
            self.active
        }
    }

    #[async_trait]
    impl CaptureBackend for Stub {
        async fn acquire_video(&self, _: &CaptureTarget) -> Result<CaptureTrack> {
            if self.deny_video {
                return Err(ReelError::CaptureDenied("screen permission denied".into()));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(CaptureTrack::new(StreamKind::Video, "screen", vec![]).with_size(1280, 720))
        }

        async fn acquire_audio(&self) -> Result<CaptureTrack> {
            if self.deny_audio {
                return Err(ReelError::CaptureDenied("microphone permission denied".into()));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(CaptureTrack::new(StreamKind::Audio, "mic", vec![]))
        }

        async fn release_track(&self, _: &CaptureTrack) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }

        async fn create_encoder(
            &self,
            _: &MediaStream,
            codec: RecordingCodec,
        ) -> Result<Box<dyn ChunkEncoder>> {
            if self.broken_codecs.contains(&codec) {
                return Err(ReelError::EncoderUnavailable(format!("{:?} unsupported", codec)));
            }
            Ok(Box::new(StubEncoder {
                sender: self.sender.clone(),
                trailing: self.trailing_chunk.clone(),
                active: false,
            }))
        }
    }

    fn controller(stub: Stub) -> (RecordingController, Arc<Stub>) {
        let stub = Arc::new(stub);
        let settings = RecorderSettings {
            target: CaptureTarget::Display(None),
            microphone: true,
            timeslice: Duration::from_secs(1),
            finish_grace: Duration::from_millis(500),
            restart_settle: Duration::from_millis(300),
        };
        (RecordingController::new(stub.clone(), settings), stub)
    }

    #[test]
    fn zero_timeslice_is_raised_to_one_millisecond() {
        let config = RecorderConfig {
            timeslice_ms: 0,
            ..RecorderConfig::default()
        };
        assert_eq!(RecorderSettings::from(&config).timeslice, Duration::from_millis(1));
    }

    #[tokio::test]
    async fn chunks_are_assembled_in_arrival_order() {
        let (mut rec, stub) = controller(Stub {
            trailing_chunk: Some(b"tail".to_vec()),
            ..Stub::default()
        });
        rec.start_recording().await.unwrap();
        assert_eq!(rec.state(), RecordingState::Recording);

        for chunk in [b"c0", b"c1", b"c2", b"c3"] {
            stub.emit(chunk);
        }
        assert_eq!(rec.chunk_count(), 4);
        stub.emit(b"c4");

        let artifact = rec.finish().await.unwrap();
        let expected: Vec<Vec<u8>> = ["c0", "c1", "c2", "c3", "c4", "tail"]
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect();
        assert_eq!(artifact.chunks, expected);
        assert_eq!(artifact.to_bytes(), b"c0c1c2c3c4tail".to_vec());
        assert_eq!(artifact.mime_type, "video/webm;codecs=vp9");
        assert_eq!(rec.state(), RecordingState::Finished);
    }

    #[tokio::test]
    async fn finishing_without_chunks_is_an_error() {
        let (mut rec, stub) = controller(Stub::default());
        rec.start_recording().await.unwrap();
        let err = rec.finish().await.unwrap_err();
        assert!(matches!(err, ReelError::EmptyRecording));
        assert_eq!(stub.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn finish_when_nothing_is_running_is_safe() {
        let (mut rec, stub) = controller(Stub::default());
        assert!(matches!(rec.finish().await, Err(ReelError::EmptyRecording)));
        assert_eq!(stub.released.load(Ordering::SeqCst), 0);
        assert_eq!(rec.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn missing_microphone_is_not_fatal() {
        let (mut rec, _stub) = controller(Stub {
            deny_audio: true,
            ..Stub::default()
        });
        rec.start_recording().await.unwrap();
        let stream = rec.stream().unwrap();
        assert_eq!(stream.tracks().len(), 1);
        assert!(stream.audio().is_none());
    }

    #[tokio::test]
    async fn denied_screen_capture_is_fatal() {
        let (mut rec, _stub) = controller(Stub {
            deny_video: true,
            ..Stub::default()
        });
        let err = rec.start_recording().await.unwrap_err();
        assert!(matches!(err, ReelError::CaptureDenied(_)));
        assert_eq!(rec.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn encoder_falls_back_to_the_second_codec() {
        let (mut rec, _stub) = controller(Stub {
            broken_codecs: vec![RecordingCodec::Vp9],
            ..Stub::default()
        });
        rec.start_recording().await.unwrap();
        assert_eq!(rec.codec(), Some(RecordingCodec::Vp8));
    }

    #[tokio::test]
    async fn no_usable_codec_releases_the_stream() {
        let (mut rec, stub) = controller(Stub {
            broken_codecs: vec![RecordingCodec::Vp9, RecordingCodec::Vp8],
            ..Stub::default()
        });
        let err = rec.start_recording().await.unwrap_err();
        assert!(matches!(err, ReelError::EncoderUnavailable(_)));
        assert_eq!(stub.released.load(Ordering::SeqCst), 2);
        assert_eq!(rec.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn pause_freezes_the_timer() {
        tokio::time::pause();
        let (mut rec, _stub) = controller(Stub::default());
        rec.start_recording().await.unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(rec.pause_resume().await.unwrap(), RecordingState::Paused);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(rec.elapsed(), Duration::from_secs(3));

        rec.record_cursor(10.0, 10.0);
        assert_eq!(rec.pause_resume().await.unwrap(), RecordingState::Recording);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(rec.elapsed(), Duration::from_secs(5));
        rec.record_cursor(20.0, 30.0);
        assert_eq!(rec.cursor_trace.len(), 1);
        assert_eq!(rec.cursor_trace[0].timestamp_ms, 5000);
    }

    #[tokio::test]
    async fn cancel_releases_tracks_once() {
        let (mut rec, stub) = controller(Stub::default());
        rec.start_recording().await.unwrap();
        stub.emit(b"data");

        rec.cancel().await;
        rec.cancel().await;
        assert_eq!(stub.released.load(Ordering::SeqCst), 2);
        assert_eq!(rec.state(), RecordingState::Cancelled);
        assert!(matches!(rec.finish().await, Err(ReelError::EmptyRecording)));
        assert_eq!(stub.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restart_discards_the_take_and_reacquires() {
        tokio::time::pause();
        let (mut rec, stub) = controller(Stub::default());
        rec.start_recording().await.unwrap();
        stub.emit(b"old");
        tokio::time::advance(Duration::from_secs(4)).await;

        rec.restart().await.unwrap();
        assert_eq!(rec.state(), RecordingState::Recording);
        assert_eq!(rec.chunk_count(), 0);
        assert_eq!(rec.elapsed(), Duration::ZERO);
        assert_eq!(stub.released.load(Ordering::SeqCst), 2);
        assert_eq!(stub.acquired.load(Ordering::SeqCst), 4);

        stub.emit(b"new");
        let artifact = rec.finish().await.unwrap();
        assert_eq!(artifact.chunks, vec![b"new".to_vec()]);
    }

    #[tokio::test]
    async fn artifact_becomes_a_media_item() {
        let (mut rec, stub) = controller(Stub::default());
        rec.start_recording().await.unwrap();
        rec.record_cursor(640.0, 360.0);
        stub.emit(b"abc");
        let artifact = rec.finish().await.unwrap();

        let item = artifact.to_media_item("Take 1", "/tmp/take1.webm");
        assert_eq!(item.kind, MediaKind::Video);
        assert_eq!(item.size, 3);
        assert_eq!((item.width, item.height), (Some(1280), Some(720)));
        assert!(item.has_cursor_trace());
    }

    #[tokio::test]
    async fn second_start_while_recording_is_rejected() {
        let (mut rec, _stub) = controller(Stub::default());
        rec.start_recording().await.unwrap();
        let err = rec.start_recording().await.unwrap_err();
        assert_eq!(err.code(), "INVALID_RECORDER_STATE");
    }
}
