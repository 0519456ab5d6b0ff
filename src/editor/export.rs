use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::store::EditorStore;
use super::types::{MediaKind, TrackKind};
use crate::error::{ReelError, Result};

/// Every rendered segment gets the same frame rate and audio layout, so the
/// concat step can copy streams without re-encoding.
const SEGMENT_FPS: u32 = 30;
const SILENCE: &str = "anullsrc=channel_layout=stereo:sample_rate=48000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Mp4,
    Webm,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Mp4 => "mp4",
            ExportFormat::Webm => "webm",
        }
    }

    fn codec_args(&self, crf: u8) -> Vec<String> {
        let crf = crf.to_string();
        let args: &[&str] = match self {
            ExportFormat::Mp4 => &[
                "-c:v", "libx264", "-preset", "medium", "-crf", crf.as_str(), "-pix_fmt", "yuv420p",
                "-c:a", "aac", "-b:a", "192k", "-movflags", "+faststart",
            ],
            ExportFormat::Webm => &[
                "-c:v", "libvpx-vp9", "-crf", crf.as_str(), "-b:v", "0", "-c:a", "libopus", "-b:a",
                "128k",
            ],
        };
        args.iter().map(|s| s.to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportQuality {
    Low,
    Medium,
    #[default]
    High,
    Ultra,
}

impl ExportQuality {
    /// Constant rate factor handed to the encoder; lower is better
    pub fn crf(&self) -> u8 {
        match self {
            ExportQuality::Low => 28,
            ExportQuality::Medium => 23,
            ExportQuality::High => 18,
            ExportQuality::Ultra => 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    pub format: ExportFormat,
    pub quality: ExportQuality,
    pub width: u32,
    pub height: u32,
}

impl From<&crate::config::ExportConfig> for ExportSettings {
    fn from(config: &crate::config::ExportConfig) -> Self {
        Self {
            format: config.format,
            quality: config.quality,
            width: config.width,
            height: config.height,
        }
    }
}

/// One clip of the export, in timeline order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportClip {
    pub source_location: String,
    pub kind: MediaKind,
    pub start_time: f64,
    pub duration: f64,
    pub trim_start: f64,
    pub trim_end: f64,
}

/// Ordered clip descriptors for the first visible video track with content.
pub fn plan_export(store: &EditorStore) -> Result<Vec<ExportClip>> {
    let track = store
        .tracks()
        .iter()
        .find(|t| t.kind == TrackKind::Video && t.visible && !t.clips.is_empty())
        .ok_or_else(|| ReelError::ExportFailed("timeline has no video clips".to_string()))?;

    track
        .sorted_clips()
        .into_iter()
        .map(|clip| {
            let media = store
                .media_item(&clip.media_id)
                .ok_or_else(|| ReelError::MediaNotFound(clip.media_id.clone()))?;
            Ok(ExportClip {
                source_location: media.location.clone(),
                kind: media.kind,
                start_time: clip.start_time,
                duration: clip.duration,
                trim_start: clip.trim_start,
                trim_end: clip.trim_end,
            })
        })
        .collect()
}

fn scale_filter(settings: &ExportSettings) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps}",
        w = settings.width,
        h = settings.height,
        fps = SEGMENT_FPS
    )
}

/// ffmpeg arguments that cut one clip out of its source and encode it.
///
/// Images are looped for the clip duration. Sources without an audio stream
/// get a silent track so every segment carries one video and one audio
/// stream.
pub fn clip_args(clip: &ExportClip, settings: &ExportSettings, has_audio: bool, output: &Path) -> Vec<String> {
    let to_args = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let mut args = vec!["-y".to_string()];
    if clip.kind == MediaKind::Image {
        args.extend(to_args(&["-loop", "1", "-framerate", &SEGMENT_FPS.to_string()]));
    } else {
        args.extend(["-ss".to_string(), format!("{:.3}", clip.trim_start)]);
    }
    args.extend(["-i".to_string(), clip.source_location.clone()]);
    let has_audio = has_audio && clip.kind != MediaKind::Image;
    if !has_audio {
        args.extend(to_args(&["-f", "lavfi", "-i", SILENCE]));
    }
    args.extend(["-t".to_string(), format!("{:.3}", clip.duration)]);
    if has_audio {
        args.extend(to_args(&["-map", "0:v:0", "-map", "0:a:0"]));
    } else {
        args.extend(to_args(&["-map", "0:v:0", "-map", "1:a:0", "-shortest"]));
    }
    args.extend(["-vf".to_string(), scale_filter(settings)]);
    args.extend(to_args(&["-ar", "48000", "-ac", "2"]));
    args.extend(settings.format.codec_args(settings.quality.crf()));
    args.push(output.to_string_lossy().to_string());
    args
}

/// Whether `ffmpeg -i <source>` stderr lists an audio stream
fn lists_audio_stream(stderr: &str) -> bool {
    stderr
        .lines()
        .any(|line| line.trim_start().starts_with("Stream #") && line.contains("Audio:"))
}

/// Concat demuxer manifest mapping each segment file in order
pub fn concat_manifest(segments: &[PathBuf]) -> String {
    segments
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', "'\\''")))
        .collect()
}

pub fn concat_args(manifest: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        manifest.to_string_lossy().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Renders clip lists through an ffmpeg binary.
pub struct FfmpegExporter {
    ffmpeg_path: String,
}

impl FfmpegExporter {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Render `clips` and return the encoded file contents.
    pub async fn export(&self, clips: &[ExportClip], settings: &ExportSettings) -> Result<Vec<u8>> {
        if clips.is_empty() {
            return Err(ReelError::ExportFailed("nothing to export".to_string()));
        }
        let workdir = tempfile::tempdir()?;
        let output = workdir
            .path()
            .join(format!("export.{}", settings.format.extension()));

        if let [clip] = clips {
            tracing::info!(source = %clip.source_location, "exporting single clip");
            let has_audio = self.has_audio(clip).await?;
            self.run(&clip_args(clip, settings, has_audio, &output)).await?;
        } else {
            tracing::info!(clips = clips.len(), "exporting concatenated timeline");
            let mut segments = Vec::with_capacity(clips.len());
            for (i, clip) in clips.iter().enumerate() {
                let segment = workdir
                    .path()
                    .join(format!("segment_{:03}.{}", i, settings.format.extension()));
                let has_audio = self.has_audio(clip).await?;
                self.run(&clip_args(clip, settings, has_audio, &segment)).await?;
                segments.push(segment);
            }
            let manifest = workdir.path().join("concat.txt");
            tokio::fs::write(&manifest, concat_manifest(&segments)).await?;
            self.run(&concat_args(&manifest, &output)).await?;
        }

        let bytes = tokio::fs::read(&output).await?;
        tracing::info!(bytes = bytes.len(), "export finished");
        Ok(bytes)
    }

    async fn has_audio(&self, clip: &ExportClip) -> Result<bool> {
        if clip.kind == MediaKind::Image {
            return Ok(false);
        }
        // no output file given, so ffmpeg exits non-zero after listing streams
        let output = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-i", clip.source_location.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ReelError::ExportFailed(format!("failed to run {}: {}", self.ffmpeg_path, e)))?;
        let has_audio = lists_audio_stream(&String::from_utf8_lossy(&output.stderr));
        tracing::debug!(source = %clip.source_location, has_audio, "inspected clip source");
        Ok(has_audio)
    }

    async fn run(&self, args: &[String]) -> Result<()> {
        tracing::debug!("Executing ffmpeg: {}", args.join(" "));
        let output = Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ReelError::ExportFailed(format!("failed to run {}: {}", self.ffmpeg_path, e)))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        Err(ReelError::ExportFailed(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            tail.join("\n")
        )))
    }
}
