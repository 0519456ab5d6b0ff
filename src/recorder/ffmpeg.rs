use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backend::{CaptureBackend, CaptureTrack, ChunkEncoder, MediaStream, RecordingCodec, StreamKind};
use super::CaptureTarget;
use crate::config::Config;
use crate::error::{ReelError, Result};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const READ_BUFFER: usize = 64 * 1024;
const MIC_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const STDERR_TAIL: usize = 5;
const MIN_TIMESLICE: Duration = Duration::from_millis(1);

/// Captures through an ffmpeg child process writing WebM to stdout.
pub struct FfmpegCaptureBackend {
    ffmpeg_path: String,
    framerate: u32,
}

impl FfmpegCaptureBackend {
    pub fn new(ffmpeg_path: impl Into<String>, framerate: u32) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            framerate,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ffmpeg_path(), config.recorder.framerate)
    }

    /// `ffmpeg -version` output, first line
    pub async fn check_ffmpeg(&self) -> Result<String> {
        let output = Command::new(&self.ffmpeg_path)
            .arg("-version")
            .output()
            .await
            .map_err(|e| {
                ReelError::CaptureDenied(format!("ffmpeg not found at {}: {}", self.ffmpeg_path, e))
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }

    async fn encoder_listing(&self) -> Result<String> {
        let output = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .output()
            .await
            .map_err(|e| ReelError::EncoderUnavailable(format!("cannot run {}: {}", self.ffmpeg_path, e)))?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Open the microphone for a fraction of a second. A missing sound
    /// server or device fails here instead of taking the whole capture
    /// process down later.
    async fn check_microphone(&self, input: &[String]) -> Result<()> {
        let mut args = to_args(&["-hide_banner", "-loglevel", "error"]);
        args.extend(input.iter().cloned());
        args.extend(to_args(&["-t", "0.1", "-f", "null", "-"]));
        let run = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(MIC_CHECK_TIMEOUT, run)
            .await
            .map_err(|_| ReelError::CaptureDenied("microphone did not respond".to_string()))?
            .map_err(|e| ReelError::CaptureDenied(format!("cannot run {}: {}", self.ffmpeg_path, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReelError::CaptureDenied(format!(
                "microphone unavailable: {}",
                tail_lines(&stderr, STDERR_TAIL).join("; ")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CaptureBackend for FfmpegCaptureBackend {
    async fn acquire_video(&self, target: &CaptureTarget) -> Result<CaptureTrack> {
        let version = self.check_ffmpeg().await?;
        tracing::debug!(%version, "using ffmpeg for capture");
        let input = video_input(target, self.framerate)?;
        let mut track = CaptureTrack::new(StreamKind::Video, describe(target), input.args);
        if let Some((width, height)) = input.size {
            track = track.with_size(width, height);
        }
        if let Some(filter) = input.filter {
            track = track.with_filter(filter);
        }
        Ok(track)
    }

    async fn acquire_audio(&self) -> Result<CaptureTrack> {
        let input = audio_input()?;
        self.check_microphone(&input).await?;
        Ok(CaptureTrack::new(StreamKind::Audio, "microphone", input))
    }

    async fn release_track(&self, track: &CaptureTrack) {
        // inputs are owned by the encoder process, which exits on stop
        tracing::debug!(track = %track.label, "capture input released");
    }

    async fn create_encoder(
        &self,
        stream: &MediaStream,
        codec: RecordingCodec,
    ) -> Result<Box<dyn ChunkEncoder>> {
        let listing = self.encoder_listing().await?;
        if !has_encoder(&listing, encoder_name(codec)) {
            return Err(ReelError::EncoderUnavailable(format!(
                "{} is not built into {}",
                encoder_name(codec),
                self.ffmpeg_path
            )));
        }
        Ok(Box::new(FfmpegEncoder {
            ffmpeg_path: self.ffmpeg_path.clone(),
            args: encode_args(stream, codec, self.framerate),
            child: None,
            pump: None,
            stopping: CancellationToken::new(),
        }))
    }
}

struct FfmpegEncoder {
    ffmpeg_path: String,
    args: Vec<String>,
    child: Option<Child>,
    pump: Option<JoinHandle<()>>,
    /// Cancelled once `stop` asks ffmpeg to quit, so the pump can tell an
    /// early exit from a requested one
    stopping: CancellationToken,
}

impl FfmpegEncoder {
    fn pid(&self) -> Result<u32> {
        self.child
            .as_ref()
            .and_then(Child::id)
            .ok_or_else(|| ReelError::EncoderUnavailable("encoder process is not running".to_string()))
    }

    #[cfg(unix)]
    async fn signal(&self, signal: &str) -> Result<()> {
        let pid = self.pid()?;
        let status = Command::new("kill")
            .args([signal, &pid.to_string()])
            .status()
            .await?;
        if !status.success() {
            return Err(ReelError::EncoderUnavailable(format!("kill {} {} failed", signal, pid)));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn signal(&self, _signal: &str) -> Result<()> {
        self.pid()?;
        Err(ReelError::EncoderUnavailable(
            "pausing ffmpeg capture is not supported on this platform".to_string(),
        ))
    }
}

#[async_trait]
impl ChunkEncoder for FfmpegEncoder {
    async fn start(&mut self, timeslice: Duration, chunks: mpsc::UnboundedSender<Vec<u8>>) -> Result<()> {
        tracing::debug!("Executing ffmpeg: {}", self.args.join(" "));
        let mut child = Command::new(&self.ffmpeg_path)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ReelError::EncoderUnavailable(format!("failed to spawn {}: {}", self.ffmpeg_path, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ReelError::EncoderUnavailable("ffmpeg stdout unavailable".to_string()))?;
        let stderr = child.stderr.take().map(|stderr| tokio::spawn(collect_stderr(stderr)));
        self.stopping = CancellationToken::new();
        let exit = PumpExit {
            stderr,
            stopping: self.stopping.clone(),
        };
        self.pump = Some(tokio::spawn(pump_chunks(stdout, timeslice, chunks, exit)));
        self.child = Some(child);
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        self.signal("-STOP").await
    }

    async fn resume(&mut self) -> Result<()> {
        self.signal("-CONT").await
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        self.stopping.cancel();
        // a stopped process can't read "q"
        if let Err(e) = self.signal_child_cont(&child).await {
            tracing::debug!(error = %e, "could not continue encoder before stop");
        }
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                tracing::debug!(error = %e, "ffmpeg stdin closed early");
            }
        }
        match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
            Ok(status) => {
                let status = status?;
                if status.success() {
                    tracing::debug!(%status, "ffmpeg exited");
                } else {
                    tracing::warn!(%status, "ffmpeg exited with failure on stop");
                }
            }
            Err(_) => {
                tracing::warn!("ffmpeg did not exit after quit request, killing");
                child.kill().await?;
            }
        }
        // the pump keeps forwarding whatever stdout still holds
        self.pump = None;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.child.is_some()
    }
}

impl FfmpegEncoder {
    #[cfg(unix)]
    async fn signal_child_cont(&self, child: &Child) -> Result<()> {
        if let Some(pid) = child.id() {
            Command::new("kill").args(["-CONT", &pid.to_string()]).status().await?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn signal_child_cont(&self, _child: &Child) -> Result<()> {
        Ok(())
    }
}

/// How the pump reports ffmpeg closing its output.
struct PumpExit {
    stderr: Option<JoinHandle<Vec<String>>>,
    stopping: CancellationToken,
}

impl PumpExit {
    /// Log the stderr tail when ffmpeg went away without being asked to.
    async fn report(self) {
        let lines = match self.stderr {
            Some(handle) => tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .ok()
                .and_then(|joined| joined.ok())
                .unwrap_or_default(),
            None => Vec::new(),
        };
        if self.stopping.is_cancelled() {
            for line in &lines {
                tracing::debug!(ffmpeg = %line, "capture stderr");
            }
        } else {
            tracing::warn!(stderr = %lines.join("; "), "ffmpeg capture exited early");
        }
    }
}

/// Keep the last few stderr lines of a capture process.
async fn collect_stderr<R: AsyncRead + Unpin>(stderr: R) -> Vec<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}

/// Forward stdout as one chunk per `timeslice`. The sender is dropped when
/// ffmpeg closes its output.
async fn pump_chunks(
    mut stdout: ChildStdout,
    timeslice: Duration,
    chunks: mpsc::UnboundedSender<Vec<u8>>,
    exit: PumpExit,
) {
    let mut ticker = tokio::time::interval(timeslice.max(MIN_TIMESLICE));
    ticker.tick().await;
    let mut pending = Vec::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        tokio::select! {
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => pending.extend_from_slice(&buf[..n]),
                Err(e) => {
                    tracing::warn!(error = %e, "reading ffmpeg output failed");
                    break;
                }
            },
            _ = ticker.tick() => {
                if !pending.is_empty() && chunks.send(std::mem::take(&mut pending)).is_err() {
                    return;
                }
            }
        }
    }
    if !pending.is_empty() {
        let _ = chunks.send(pending);
    }
    drop(chunks);
    exit.report().await;
}

fn describe(target: &CaptureTarget) -> String {
    match target {
        CaptureTarget::Display(Some(id)) => format!("display {}", id),
        CaptureTarget::Display(None) => "display".to_string(),
        CaptureTarget::Window(id) => format!("window {}", id),
        CaptureTarget::Area { width, height, .. } => format!("area {}x{}", width, height),
    }
}

fn encoder_name(codec: RecordingCodec) -> &'static str {
    match codec {
        RecordingCodec::Vp9 => "libvpx-vp9",
        RecordingCodec::Vp8 => "libvpx",
    }
}

/// Whether `-encoders` output lists `name` as an encoder
fn has_encoder(listing: &str, name: &str) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|n| n == name)
}

/// Timestamps are rebuilt from frame and sample counts, so the wall-clock
/// time spent paused (SIGSTOP) leaves no gap in the output.
fn encode_args(stream: &MediaStream, codec: RecordingCodec, framerate: u32) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for track in stream.tracks() {
        args.extend(track.input.iter().cloned());
    }
    if let Some(video) = stream.video() {
        let setpts = format!("setpts=N/{}/TB", framerate.max(1));
        let filter = match &video.filter {
            Some(filter) => format!("{},{}", filter, setpts),
            None => setpts,
        };
        args.extend(["-vf".to_string(), filter, "-r".to_string(), framerate.max(1).to_string()]);
    }
    if stream.audio().is_some() {
        args.extend(to_args(&["-af", "asetpts=N/SR/TB"]));
    }
    args.extend(
        [
            "-c:v",
            encoder_name(codec),
            "-deadline",
            "realtime",
            "-cpu-used",
            "8",
            "-b:v",
            "2500k",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    if stream.audio().is_some() {
        args.extend(["-c:a", "libopus", "-b:a", "128k"].iter().map(|s| s.to_string()));
    }
    args.extend(["-f", "webm", "pipe:1"].iter().map(|s| s.to_string()));
    args
}

fn to_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Last `n` non-empty lines of process output.
fn tail_lines(output: &str, n: usize) -> Vec<String> {
    let lines: Vec<&str> = output.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines[lines.len().saturating_sub(n)..]
        .iter()
        .map(|l| l.to_string())
        .collect()
}

/// Screen input arguments for one capture target.
struct VideoInput {
    args: Vec<String>,
    size: Option<(u32, u32)>,
    /// Filter the platform needs on top of the raw input (cropping)
    filter: Option<String>,
}

impl VideoInput {
    fn new(args: Vec<String>, size: Option<(u32, u32)>) -> Self {
        Self { args, size, filter: None }
    }
}

#[cfg(target_os = "linux")]
fn video_input(target: &CaptureTarget, framerate: u32) -> Result<VideoInput> {
    let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0.0".to_string());
    let rate = framerate.to_string();
    let mut args = to_args(&["-f", "x11grab", "-framerate", &rate, "-draw_mouse", "1"]);
    let size = match target {
        CaptureTarget::Display(id) => {
            args.extend(to_args(&["-i", id.as_deref().unwrap_or(&display)]));
            None
        }
        CaptureTarget::Window(id) => {
            args.extend(to_args(&["-window_id", id, "-i", &display]));
            None
        }
        CaptureTarget::Area { x, y, width, height } => {
            let video_size = format!("{}x{}", width, height);
            let origin = format!("{}+{},{}", display, x, y);
            args.extend(to_args(&["-video_size", &video_size, "-i", &origin]));
            Some((*width, *height))
        }
    };
    Ok(VideoInput::new(args, size))
}

#[cfg(target_os = "macos")]
fn video_input(target: &CaptureTarget, framerate: u32) -> Result<VideoInput> {
    let rate = framerate.to_string();
    let mut args = to_args(&["-f", "avfoundation", "-framerate", &rate, "-capture_cursor", "1"]);
    match target {
        CaptureTarget::Display(id) => {
            let device = format!("{}:none", id.as_deref().unwrap_or("1"));
            args.extend(to_args(&["-i", &device]));
            Ok(VideoInput::new(args, None))
        }
        CaptureTarget::Window(_) => Err(ReelError::CaptureDenied(
            "window capture is not available through avfoundation".to_string(),
        )),
        CaptureTarget::Area { x, y, width, height } => {
            args.extend(to_args(&["-i", "1:none"]));
            let mut input = VideoInput::new(args, Some((*width, *height)));
            input.filter = Some(format!("crop={}:{}:{}:{}", width, height, x, y));
            Ok(input)
        }
    }
}

#[cfg(target_os = "windows")]
fn video_input(target: &CaptureTarget, framerate: u32) -> Result<VideoInput> {
    let rate = framerate.to_string();
    let mut args = to_args(&["-f", "gdigrab", "-framerate", &rate]);
    let size = match target {
        CaptureTarget::Display(_) => {
            args.extend(to_args(&["-i", "desktop"]));
            None
        }
        CaptureTarget::Window(title) => {
            args.extend(to_args(&["-i", &format!("title={}", title)]));
            None
        }
        CaptureTarget::Area { x, y, width, height } => {
            args.extend(to_args(&[
                "-offset_x",
                &x.to_string(),
                "-offset_y",
                &y.to_string(),
                "-video_size",
                &format!("{}x{}", width, height),
                "-i",
                "desktop",
            ]));
            Some((*width, *height))
        }
    };
    Ok(VideoInput::new(args, size))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn video_input(_target: &CaptureTarget, _framerate: u32) -> Result<VideoInput> {
    Err(ReelError::CaptureDenied("screen capture is not supported on this platform".to_string()))
}

fn audio_input() -> Result<Vec<String>> {
    if cfg!(target_os = "linux") {
        Ok(to_args(&["-f", "pulse", "-i", "default"]))
    } else if cfg!(target_os = "macos") {
        Ok(to_args(&["-f", "avfoundation", "-i", ":0"]))
    } else {
        Err(ReelError::CaptureDenied(
            "no default microphone input for this platform".to_string(),
        ))
    }
}
