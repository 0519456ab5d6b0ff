pub mod backend;
pub mod controller;
pub mod ffmpeg;

use serde::{Deserialize, Serialize};

pub use backend::{CaptureBackend, CaptureTrack, ChunkEncoder, MediaStream, RecordingCodec, StreamKind};
pub use controller::{RecordedArtifact, RecorderSettings, RecordingController, RecordingState};
pub use ffmpeg::FfmpegCaptureBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Area,
    Window,
    #[default]
    Display,
}

/// What to capture.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureTarget {
    /// Whole display; `None` picks the default one
    Display(Option<String>),
    Window(String),
    Area {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

impl CaptureTarget {
    /// Build a target from a capture mode and its source string. A missing or
    /// malformed source falls back to the default display.
    pub fn from_config(mode: CaptureMode, source: Option<&str>) -> Self {
        match (mode, source) {
            (CaptureMode::Display, source) => CaptureTarget::Display(source.map(str::to_string)),
            (CaptureMode::Window, Some(id)) => CaptureTarget::Window(id.to_string()),
            (CaptureMode::Area, Some(area)) => match parse_area(area) {
                Some((x, y, width, height)) => CaptureTarget::Area { x, y, width, height },
                None => {
                    tracing::warn!(area, "unparseable capture area, using full display");
                    CaptureTarget::Display(None)
                }
            },
            (mode, None) => {
                tracing::warn!(?mode, "capture mode needs a source, using full display");
                CaptureTarget::Display(None)
            }
        }
    }
}

/// `WxH+X,Y`, e.g. `1280x720+100,50`
fn parse_area(area: &str) -> Option<(u32, u32, u32, u32)> {
    let (size, origin) = area.split_once('+')?;
    let (w, h) = size.split_once('x')?;
    let (x, y) = origin.split_once(',')?;
    let width: u32 = w.trim().parse().ok()?;
    let height: u32 = h.trim().parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?, width, height))
}
