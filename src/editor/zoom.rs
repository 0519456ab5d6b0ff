//! Zoom lane authoring and playback-time zoom resolution.

use super::store::EditorStore;
use super::types::{CursorPoint, MediaKind, TrackKind, ZoomMode, ZoomSegment};
use crate::error::Result;

pub const DEFAULT_SEGMENT_DURATION: f64 = 3.0;
pub const DEFAULT_SEGMENT_ZOOM: f64 = 1.5;

/// What a click on the zoom lane did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoomLaneClick {
    Created(String),
    Selected(String),
}

/// Handle a click at `time` on the zoom lane.
///
/// Inside an existing segment the click selects it. On empty space a new
/// segment is created; it follows the cursor when the timeline has a video
/// track and stops short of the next segment so ranges never overlap.
pub fn click_zoom_lane(store: &mut EditorStore, time: f64) -> Result<ZoomLaneClick> {
    let time = time.max(0.0);
    if let Some(existing) = store
        .zoom_segments()
        .iter()
        .find(|s| s.contains(time))
        .map(|s| s.id.clone())
    {
        store.select_zoom_segment(Some(&existing))?;
        return Ok(ZoomLaneClick::Selected(existing));
    }

    let next_start = store
        .zoom_segments()
        .iter()
        .map(|s| s.start_time)
        .filter(|start| *start > time)
        .fold(f64::INFINITY, f64::min);
    let duration = DEFAULT_SEGMENT_DURATION.min(next_start - time);

    let mode = if store.has_video_track() {
        ZoomMode::Auto
    } else {
        ZoomMode::Manual
    };
    let segment = ZoomSegment {
        id: uuid::Uuid::new_v4().to_string(),
        start_time: time,
        duration,
        zoom_level: DEFAULT_SEGMENT_ZOOM,
        mode,
        target_x: 0.5,
        target_y: 0.5,
    };
    let id = store.add_zoom_segment(segment)?;
    store.select_zoom_segment(Some(&id))?;
    tracing::debug!(segment = %id, time, ?mode, "zoom segment created");
    Ok(ZoomLaneClick::Created(id))
}

/// Effective camera zoom at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomFocus {
    pub level: f64,
    /// Fraction of frame width, 0..=1
    pub x: f64,
    /// Fraction of frame height, 0..=1
    pub y: f64,
}

/// Resolve the zoom applied at `time`, if any segment covers it.
///
/// Auto segments look up the cursor trace of the topmost video clip under
/// the playhead and fall back to the segment's fixed target when there is no
/// usable trace.
pub fn zoom_at(store: &EditorStore, time: f64) -> Option<ZoomFocus> {
    let segment = store.zoom_segments().iter().find(|s| s.contains(time))?;
    let fixed = ZoomFocus {
        level: segment.zoom_level,
        x: segment.target_x,
        y: segment.target_y,
    };
    if segment.mode == ZoomMode::Manual {
        return Some(fixed);
    }

    let followed = store
        .tracks()
        .iter()
        .filter(|t| t.kind == TrackKind::Video && t.visible)
        .flat_map(|t| t.clips.iter())
        .find(|c| c.contains(time))
        .and_then(|clip| {
            let media = store.media_item(&clip.media_id)?;
            if media.kind != MediaKind::Video {
                return None;
            }
            let (width, height) = (media.width? as f64, media.height? as f64);
            let trace = media.cursor_trace.as_deref()?;
            let source_ms = (clip.source_time(time) * 1000.0).max(0.0);
            let (x, y) = cursor_at(trace, source_ms)?;
            Some(((x / width).clamp(0.0, 1.0), (y / height).clamp(0.0, 1.0)))
        });

    Some(match followed {
        Some((x, y)) => ZoomFocus {
            level: segment.zoom_level,
            x,
            y,
        },
        None => fixed,
    })
}

/// Linear interpolation over a trace ordered by timestamp
fn cursor_at(trace: &[CursorPoint], time_ms: f64) -> Option<(f64, f64)> {
    let first = trace.first()?;
    if time_ms <= first.timestamp_ms as f64 {
        return Some((first.x, first.y));
    }
    let after = trace.partition_point(|p| (p.timestamp_ms as f64) <= time_ms);
    if after >= trace.len() {
        let last = trace.last()?;
        return Some((last.x, last.y));
    }
    let a = &trace[after - 1];
    let b = &trace[after];
    let span = (b.timestamp_ms - a.timestamp_ms) as f64;
    let t = if span > 0.0 {
        (time_ms - a.timestamp_ms as f64) / span
    } else {
        0.0
    };
    Some((a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t))
}
