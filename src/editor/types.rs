use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
}

/// Pointer position sampled while recording, in capture pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPoint {
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: u64,
}

/// An imported or recorded asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: String,
    pub name: String,
    pub kind: MediaKind,
    /// File path, URL or blob reference
    pub location: String,
    /// Seconds
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Ordered by `timestamp_ms`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_trace: Option<Vec<CursorPoint>>,
}

impl MediaItem {
    pub fn new(kind: MediaKind, name: impl Into<String>, location: impl Into<String>, duration: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            location: location.into(),
            duration,
            width: None,
            height: None,
            size: 0,
            thumbnail: None,
            cursor_trace: None,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn has_cursor_trace(&self) -> bool {
        self.cursor_trace.as_ref().is_some_and(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    Text,
}

impl TrackKind {
    /// Whether media of `kind` may be placed on a track of this kind
    pub fn accepts(&self, kind: MediaKind) -> bool {
        matches!(
            (self, kind),
            (TrackKind::Video, MediaKind::Video)
                | (TrackKind::Video, MediaKind::Image)
                | (TrackKind::Audio, MediaKind::Audio)
                | (TrackKind::Audio, MediaKind::Video)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineTrack {
    pub id: String,
    pub kind: TrackKind,
    pub name: String,
    pub clips: Vec<TimelineClip>,
    pub locked: bool,
    pub visible: bool,
}

impl TimelineTrack {
    pub fn new(kind: TrackKind, name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            name: name.into(),
            clips: Vec::new(),
            locked: false,
            visible: true,
        }
    }

    /// Clips ordered by start time
    pub fn sorted_clips(&self) -> Vec<&TimelineClip> {
        let mut clips: Vec<&TimelineClip> = self.clips.iter().collect();
        clips.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        clips
    }

    pub fn end_time(&self) -> f64 {
        self.clips.iter().map(TimelineClip::end_time).fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineClip {
    pub id: String,
    pub media_id: String,
    pub track_id: String,
    pub start_time: f64,
    pub duration: f64,
    pub trim_start: f64,
    pub trim_end: f64,
    pub volume: f64,
}

impl TimelineClip {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Half-open range check: `[start, end)`
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start_time && time < self.end_time()
    }

    /// Position inside the source media for a timeline time
    pub fn source_time(&self, time: f64) -> f64 {
        time - self.start_time + self.trim_start
    }
}

/// Clip placement supplied by the caller when adding a clip.
#[derive(Debug, Clone, PartialEq)]
pub struct NewClip {
    pub media_id: String,
    pub start_time: f64,
    /// Defaults to the untrimmed media length
    pub duration: Option<f64>,
    pub trim_start: f64,
    pub trim_end: f64,
    pub volume: f64,
}

impl NewClip {
    pub fn new(media_id: impl Into<String>, start_time: f64) -> Self {
        Self {
            media_id: media_id.into(),
            start_time,
            duration: None,
            trim_start: 0.0,
            trim_end: 0.0,
            volume: 1.0,
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Partial update of a clip; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClipUpdate {
    pub start_time: Option<f64>,
    pub duration: Option<f64>,
    pub trim_start: Option<f64>,
    pub trim_end: Option<f64>,
    pub volume: Option<f64>,
    pub track_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackUpdate {
    pub name: Option<String>,
    pub locked: Option<bool>,
    pub visible: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoomMode {
    /// Follows the cursor trace of the recording under the playhead
    Auto,
    /// Fixed fractional target
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoomSegment {
    pub id: String,
    pub start_time: f64,
    pub duration: f64,
    pub zoom_level: f64,
    pub mode: ZoomMode,
    pub target_x: f64,
    pub target_y: f64,
}

impl ZoomSegment {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start_time && time < self.end_time()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoomSegmentUpdate {
    pub start_time: Option<f64>,
    pub duration: Option<f64>,
    pub zoom_level: Option<f64>,
    pub mode: Option<ZoomMode>,
    pub target_x: Option<f64>,
    pub target_y: Option<f64>,
}
