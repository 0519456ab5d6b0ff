use tokio::sync::watch;

use super::coords::{clamp_zoom, DEFAULT_ZOOM};
use super::history::{History, HistoryState, DEFAULT_HISTORY_LIMIT};
use super::types::{
    ClipUpdate, MediaItem, MediaKind, NewClip, TimelineClip, TimelineTrack, TrackKind,
    TrackUpdate, ZoomSegment, ZoomSegmentUpdate,
};
use crate::config::EditorConfig;
use crate::error::{ReelError, Result};

/// Seconds an image clip lasts when no duration is given
pub const DEFAULT_IMAGE_DURATION: f64 = 5.0;

pub const MIN_ZOOM_LEVEL: f64 = 1.0;
pub const MAX_ZOOM_LEVEL: f64 = 2.0;

/// Whether a clip update lands in the undo history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    Record,
    /// Continuous pointer drag; the caller commits once on release
    Live,
}

/// Timeline state for one open editor.
///
/// All mutation goes through the methods below, which keep the derived
/// duration and the undo ring consistent and bump the revision that
/// subscribers watch.
#[derive(Debug)]
pub struct EditorStore {
    media: Vec<MediaItem>,
    tracks: Vec<TimelineTrack>,
    zoom_segments: Vec<ZoomSegment>,
    current_time: f64,
    duration: f64,
    zoom: f64,
    is_playing: bool,
    selected_clip_ids: Vec<String>,
    selected_zoom_segment: Option<String>,
    history: History,
    revision: watch::Sender<u64>,
}

impl Default for EditorStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl EditorStore {
    pub fn new(history_limit: usize) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            media: Vec::new(),
            tracks: Vec::new(),
            zoom_segments: Vec::new(),
            current_time: 0.0,
            duration: 0.0,
            zoom: DEFAULT_ZOOM,
            is_playing: false,
            selected_clip_ids: Vec::new(),
            selected_zoom_segment: None,
            history: History::new(
                HistoryState {
                    tracks: Vec::new(),
                    duration: 0.0,
                },
                history_limit,
            ),
            revision,
        }
    }

    pub fn from_config(config: &EditorConfig) -> Self {
        let mut store = Self::new(config.history_limit);
        store.zoom = clamp_zoom(config.default_zoom);
        store
    }

    /// Replace the whole timeline, e.g. after loading a project. History
    /// restarts from the loaded state.
    pub(crate) fn replace_contents(
        &mut self,
        media: Vec<MediaItem>,
        tracks: Vec<TimelineTrack>,
        zoom_segments: Vec<ZoomSegment>,
        zoom: f64,
    ) {
        self.media = media;
        self.tracks = tracks;
        self.zoom_segments = zoom_segments;
        self.zoom = clamp_zoom(zoom);
        self.current_time = 0.0;
        self.is_playing = false;
        self.selected_clip_ids.clear();
        self.selected_zoom_segment = None;
        self.recompute_duration();
        self.history.reset(self.snapshot());
        self.notify();
    }

    // ---- read access ----

    pub fn media(&self) -> &[MediaItem] {
        &self.media
    }

    pub fn media_item(&self, id: &str) -> Option<&MediaItem> {
        self.media.iter().find(|m| m.id == id)
    }

    pub fn tracks(&self) -> &[TimelineTrack] {
        &self.tracks
    }

    pub fn track(&self, id: &str) -> Option<&TimelineTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn clip(&self, id: &str) -> Option<&TimelineClip> {
        self.tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .find(|c| c.id == id)
    }

    pub fn zoom_segments(&self) -> &[ZoomSegment] {
        &self.zoom_segments
    }

    pub fn zoom_segment(&self, id: &str) -> Option<&ZoomSegment> {
        self.zoom_segments.iter().find(|s| s.id == id)
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn selected_clip_ids(&self) -> &[String] {
        &self.selected_clip_ids
    }

    pub fn selected_zoom_segment(&self) -> Option<&str> {
        self.selected_zoom_segment.as_deref()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn has_video_track(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Video)
    }

    /// Revision counter, bumped on every change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    // ---- media library ----

    pub fn add_media(&mut self, item: MediaItem) -> Result<String> {
        if !item.duration.is_finite() || item.duration < 0.0 {
            return Err(ReelError::invalid("duration", "must be a non-negative number"));
        }
        let id = item.id.clone();
        tracing::debug!(media = %id, name = %item.name, "media added");
        self.media.push(item);
        self.notify();
        Ok(id)
    }

    /// Remove a media item together with every clip that references it.
    pub fn remove_media(&mut self, media_id: &str) -> Result<()> {
        let pos = self
            .media
            .iter()
            .position(|m| m.id == media_id)
            .ok_or_else(|| ReelError::MediaNotFound(media_id.to_string()))?;
        self.media.remove(pos);

        let mut removed = Vec::new();
        for track in &mut self.tracks {
            track.clips.retain(|c| {
                if c.media_id == media_id {
                    removed.push(c.id.clone());
                    false
                } else {
                    true
                }
            });
        }
        self.selected_clip_ids.retain(|id| !removed.contains(id));

        if !removed.is_empty() {
            tracing::debug!(media = media_id, clips = removed.len(), "cascade removed clips");
            self.recompute_duration();
            self.push_history();
        }
        self.notify();
        Ok(())
    }

    // ---- tracks ----

    pub fn add_track(&mut self, kind: TrackKind) -> String {
        let count = self.tracks.iter().filter(|t| t.kind == kind).count();
        let name = match kind {
            TrackKind::Video => format!("Video {}", count + 1),
            TrackKind::Audio => format!("Audio {}", count + 1),
            TrackKind::Text => format!("Text {}", count + 1),
        };
        let track = TimelineTrack::new(kind, name);
        let id = track.id.clone();
        self.tracks.push(track);
        self.commit(format_args!("add track {}", id));
        id
    }

    pub fn remove_track(&mut self, track_id: &str) -> Result<()> {
        let pos = self.track_index(track_id)?;
        let track = self.tracks.remove(pos);
        let removed: Vec<&str> = track.clips.iter().map(|c| c.id.as_str()).collect();
        self.selected_clip_ids.retain(|id| !removed.contains(&id.as_str()));
        self.commit(format_args!("remove track {}", track_id));
        Ok(())
    }

    pub fn update_track(&mut self, track_id: &str, update: TrackUpdate) -> Result<()> {
        let pos = self.track_index(track_id)?;
        let track = &mut self.tracks[pos];
        if let Some(name) = update.name {
            track.name = name;
        }
        if let Some(locked) = update.locked {
            track.locked = locked;
        }
        if let Some(visible) = update.visible {
            track.visible = visible;
        }
        self.commit(format_args!("update track {}", track_id));
        Ok(())
    }

    // ---- clips ----

    pub fn add_clip(&mut self, track_id: &str, new_clip: NewClip) -> Result<String> {
        let pos = self.track_index(track_id)?;
        if self.tracks[pos].locked {
            return Err(ReelError::TrackLocked(track_id.to_string()));
        }
        let media = self
            .media_item(&new_clip.media_id)
            .ok_or_else(|| ReelError::MediaNotFound(new_clip.media_id.clone()))?;
        if !self.tracks[pos].kind.accepts(media.kind) {
            return Err(ReelError::invalid(
                "track",
                format!("{:?} track cannot hold {:?} media", self.tracks[pos].kind, media.kind),
            ));
        }

        let duration = new_clip.duration.unwrap_or(match media.kind {
            MediaKind::Image => DEFAULT_IMAGE_DURATION,
            _ => media.duration - new_clip.trim_start - new_clip.trim_end,
        });
        let clip = TimelineClip {
            id: uuid::Uuid::new_v4().to_string(),
            media_id: new_clip.media_id,
            track_id: track_id.to_string(),
            start_time: new_clip.start_time,
            duration,
            trim_start: new_clip.trim_start,
            trim_end: new_clip.trim_end,
            volume: new_clip.volume,
        };
        self.validate_clip(&clip)?;

        let id = clip.id.clone();
        self.tracks[pos].clips.push(clip);
        self.commit(format_args!("add clip {}", id));
        Ok(id)
    }

    pub fn remove_clip(&mut self, clip_id: &str) -> Result<()> {
        let (ti, ci) = self.locate_clip(clip_id)?;
        if self.tracks[ti].locked {
            return Err(ReelError::TrackLocked(self.tracks[ti].id.clone()));
        }
        self.tracks[ti].clips.remove(ci);
        self.selected_clip_ids.retain(|id| id != clip_id);
        self.commit(format_args!("remove clip {}", clip_id));
        Ok(())
    }

    /// Apply a partial update. Rejected updates leave the clip untouched.
    pub fn update_clip(&mut self, clip_id: &str, update: ClipUpdate, mode: HistoryMode) -> Result<()> {
        let (ti, ci) = self.locate_clip(clip_id)?;
        if self.tracks[ti].locked {
            return Err(ReelError::TrackLocked(self.tracks[ti].id.clone()));
        }

        let mut clip = self.tracks[ti].clips[ci].clone();
        if let Some(v) = update.start_time {
            clip.start_time = v;
        }
        if let Some(v) = update.duration {
            clip.duration = v;
        }
        if let Some(v) = update.trim_start {
            clip.trim_start = v;
        }
        if let Some(v) = update.trim_end {
            clip.trim_end = v;
        }
        if let Some(v) = update.volume {
            clip.volume = v;
        }

        let mut target = ti;
        if let Some(track_id) = update.track_id {
            target = self.track_index(&track_id)?;
            let track = &self.tracks[target];
            if track.locked {
                return Err(ReelError::TrackLocked(track_id));
            }
            let kind = self
                .media_item(&clip.media_id)
                .map(|m| m.kind)
                .ok_or_else(|| ReelError::MediaNotFound(clip.media_id.clone()))?;
            if !track.kind.accepts(kind) {
                return Err(ReelError::invalid(
                    "track",
                    format!("{:?} track cannot hold {:?} media", track.kind, kind),
                ));
            }
            clip.track_id = track_id;
        }
        self.validate_clip(&clip)?;

        if target == ti {
            self.tracks[ti].clips[ci] = clip;
        } else {
            self.tracks[ti].clips.remove(ci);
            self.tracks[target].clips.push(clip);
        }

        self.recompute_duration();
        if mode == HistoryMode::Record {
            self.push_history();
        }
        self.notify();
        Ok(())
    }

    /// Push the current state as one undo step. Used when a live drag ends.
    pub fn commit_history(&mut self) {
        self.push_history();
        self.notify();
    }

    /// Cut a clip in two at `split_time`.
    ///
    /// Returns `false` and leaves state unchanged unless the time falls
    /// strictly inside the clip.
    pub fn split_clip(&mut self, clip_id: &str, split_time: f64) -> bool {
        let Ok((ti, ci)) = self.locate_clip(clip_id) else {
            return false;
        };
        if self.tracks[ti].locked {
            return false;
        }
        let clip = &self.tracks[ti].clips[ci];
        if split_time <= clip.start_time || split_time >= clip.end_time() {
            return false;
        }

        let elapsed = split_time - clip.start_time;
        let remainder = clip.duration - elapsed;

        let first = TimelineClip {
            id: format!("{}-1", clip.id),
            duration: elapsed,
            trim_end: clip.trim_end + remainder,
            ..clip.clone()
        };
        let second = TimelineClip {
            id: format!("{}-2", clip.id),
            start_time: split_time,
            duration: remainder,
            trim_start: clip.trim_start + elapsed,
            ..clip.clone()
        };

        self.selected_clip_ids = vec![first.id.clone(), second.id.clone()];
        self.tracks[ti].clips.splice(ci..=ci, [first, second]);
        self.commit(format_args!("split clip {} at {:.3}", clip_id, split_time));
        true
    }

    // ---- history ----

    pub fn undo(&mut self) -> bool {
        let Some(state) = self.history.undo() else {
            return false;
        };
        self.tracks = state.tracks.clone();
        self.duration = state.duration;
        self.selected_clip_ids.clear();
        tracing::debug!(index = self.history.index(), "undo");
        self.notify();
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(state) = self.history.redo() else {
            return false;
        };
        self.tracks = state.tracks.clone();
        self.duration = state.duration;
        self.selected_clip_ids.clear();
        tracing::debug!(index = self.history.index(), "redo");
        self.notify();
        true
    }

    // ---- selection and playback ----

    pub fn select_clip(&mut self, clip_id: &str, additive: bool) -> Result<()> {
        if self.clip(clip_id).is_none() {
            return Err(ReelError::ClipNotFound(clip_id.to_string()));
        }
        if additive {
            if let Some(pos) = self.selected_clip_ids.iter().position(|id| id == clip_id) {
                self.selected_clip_ids.remove(pos);
            } else {
                self.selected_clip_ids.push(clip_id.to_string());
            }
        } else {
            self.selected_clip_ids = vec![clip_id.to_string()];
        }
        self.notify();
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selected_clip_ids.clear();
        self.selected_zoom_segment = None;
        self.notify();
    }

    pub fn set_current_time(&mut self, time: f64) {
        self.current_time = if time.is_finite() {
            time.clamp(0.0, self.duration)
        } else {
            0.0
        };
        self.notify();
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.is_playing = playing;
        self.notify();
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.zoom = clamp_zoom(zoom);
        self.notify();
    }

    // ---- zoom segments ----

    pub fn add_zoom_segment(&mut self, segment: ZoomSegment) -> Result<String> {
        validate_zoom_segment(&segment)?;
        let id = segment.id.clone();
        self.zoom_segments.push(segment);
        self.zoom_segments
            .sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        self.notify();
        Ok(id)
    }

    pub fn update_zoom_segment(&mut self, segment_id: &str, update: ZoomSegmentUpdate) -> Result<()> {
        let pos = self
            .zoom_segments
            .iter()
            .position(|s| s.id == segment_id)
            .ok_or_else(|| ReelError::ZoomSegmentNotFound(segment_id.to_string()))?;

        let mut segment = self.zoom_segments[pos].clone();
        if let Some(v) = update.start_time {
            segment.start_time = v;
        }
        if let Some(v) = update.duration {
            segment.duration = v;
        }
        if let Some(v) = update.zoom_level {
            segment.zoom_level = v;
        }
        if let Some(v) = update.mode {
            segment.mode = v;
        }
        if let Some(v) = update.target_x {
            segment.target_x = v;
        }
        if let Some(v) = update.target_y {
            segment.target_y = v;
        }
        validate_zoom_segment(&segment)?;

        self.zoom_segments[pos] = segment;
        self.zoom_segments
            .sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        self.notify();
        Ok(())
    }

    pub fn remove_zoom_segment(&mut self, segment_id: &str) -> Result<()> {
        let pos = self
            .zoom_segments
            .iter()
            .position(|s| s.id == segment_id)
            .ok_or_else(|| ReelError::ZoomSegmentNotFound(segment_id.to_string()))?;
        self.zoom_segments.remove(pos);
        if self.selected_zoom_segment.as_deref() == Some(segment_id) {
            self.selected_zoom_segment = None;
        }
        self.notify();
        Ok(())
    }

    pub fn select_zoom_segment(&mut self, segment_id: Option<&str>) -> Result<()> {
        if let Some(id) = segment_id {
            if self.zoom_segment(id).is_none() {
                return Err(ReelError::ZoomSegmentNotFound(id.to_string()));
            }
        }
        self.selected_zoom_segment = segment_id.map(str::to_string);
        self.notify();
        Ok(())
    }

    // ---- internals ----

    fn track_index(&self, track_id: &str) -> Result<usize> {
        self.tracks
            .iter()
            .position(|t| t.id == track_id)
            .ok_or_else(|| ReelError::TrackNotFound(track_id.to_string()))
    }

    fn locate_clip(&self, clip_id: &str) -> Result<(usize, usize)> {
        for (ti, track) in self.tracks.iter().enumerate() {
            if let Some(ci) = track.clips.iter().position(|c| c.id == clip_id) {
                return Ok((ti, ci));
            }
        }
        Err(ReelError::ClipNotFound(clip_id.to_string()))
    }

    fn validate_clip(&self, clip: &TimelineClip) -> Result<()> {
        validate_clip(clip, &self.media)
    }

    fn recompute_duration(&mut self) {
        self.duration = self
            .tracks
            .iter()
            .map(TimelineTrack::end_time)
            .fold(0.0, f64::max);
        if self.current_time > self.duration {
            self.current_time = self.duration;
        }
    }

    fn snapshot(&self) -> HistoryState {
        HistoryState {
            tracks: self.tracks.clone(),
            duration: self.duration,
        }
    }

    fn push_history(&mut self) {
        let state = self.snapshot();
        self.history.push(state);
    }

    /// Structural mutation epilogue: derived duration, history, notification
    fn commit(&mut self, what: std::fmt::Arguments<'_>) {
        self.recompute_duration();
        self.push_history();
        tracing::debug!(duration = self.duration, "{}", what);
        self.notify();
    }

    fn notify(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

/// Field checks for a clip placed on the timeline, against the media library.
pub(crate) fn validate_clip(clip: &TimelineClip, media: &[MediaItem]) -> Result<()> {
    if !clip.start_time.is_finite() || clip.start_time < 0.0 {
        return Err(ReelError::invalid("startTime", "must be zero or positive"));
    }
    if !clip.duration.is_finite() || clip.duration <= 0.0 {
        return Err(ReelError::invalid("duration", "must be positive"));
    }
    if clip.trim_start < 0.0 || clip.trim_end < 0.0 {
        return Err(ReelError::invalid("trim", "trims cannot be negative"));
    }
    if !(0.0..=1.0).contains(&clip.volume) {
        return Err(ReelError::invalid("volume", "must be between 0 and 1"));
    }
    let media = media
        .iter()
        .find(|m| m.id == clip.media_id)
        .ok_or_else(|| ReelError::MediaNotFound(clip.media_id.clone()))?;
    if media.kind != MediaKind::Image && clip.trim_start + clip.trim_end >= media.duration {
        return Err(ReelError::invalid(
            "trim",
            format!(
                "trimStart + trimEnd ({:.3}s) must be shorter than the media ({:.3}s)",
                clip.trim_start + clip.trim_end,
                media.duration
            ),
        ));
    }
    Ok(())
}

pub(crate) fn validate_zoom_segment(segment: &ZoomSegment) -> Result<()> {
    if !segment.start_time.is_finite() || segment.start_time < 0.0 {
        return Err(ReelError::invalid("startTime", "must be zero or positive"));
    }
    if !segment.duration.is_finite() || segment.duration <= 0.0 {
        return Err(ReelError::invalid("duration", "must be positive"));
    }
    if !(MIN_ZOOM_LEVEL..=MAX_ZOOM_LEVEL).contains(&segment.zoom_level) {
        return Err(ReelError::invalid(
            "zoomLevel",
            format!("must be between {} and {}", MIN_ZOOM_LEVEL, MAX_ZOOM_LEVEL),
        ));
    }
    if !(0.0..=1.0).contains(&segment.target_x) || !(0.0..=1.0).contains(&segment.target_y) {
        return Err(ReelError::invalid("target", "must be a fraction between 0 and 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::types::ZoomMode;

    fn store_with_video(duration: f64) -> (EditorStore, String, String) {
        let mut store = EditorStore::default();
        let media = store
            .add_media(MediaItem::new(MediaKind::Video, "clip.webm", "/tmp/clip.webm", duration))
            .unwrap();
        let track = store.add_track(TrackKind::Video);
        (store, media, track)
    }

    fn split_fixture() -> (EditorStore, String) {
        let (mut store, media, track) = store_with_video(60.0);
        let clip = store
            .add_clip(&track, NewClip::new(&media, 10.0).with_duration(20.0))
            .unwrap();
        (store, clip)
    }

    #[test]
    fn duration_follows_clip_mutations() {
        let (mut store, media, track) = store_with_video(30.0);
        assert_eq!(store.duration(), 0.0);

        let clip = store
            .add_clip(&track, NewClip::new(&media, 5.0).with_duration(10.0))
            .unwrap();
        assert_eq!(store.duration(), 15.0);

        store.remove_clip(&clip).unwrap();
        assert_eq!(store.duration(), 0.0);
    }

    #[test]
    fn add_clip_defaults_to_trimmed_media_length() {
        let (mut store, media, track) = store_with_video(12.0);
        let mut new_clip = NewClip::new(&media, 0.0);
        new_clip.trim_start = 2.0;
        let clip = store.add_clip(&track, new_clip).unwrap();
        assert_eq!(store.clip(&clip).unwrap().duration, 10.0);
    }

    #[test]
    fn split_produces_two_adjacent_clips() {
        let (mut store, clip) = split_fixture();
        assert!(store.split_clip(&clip, 15.0));

        let first = store.clip(&format!("{}-1", clip)).unwrap().clone();
        let second = store.clip(&format!("{}-2", clip)).unwrap().clone();
        assert!(store.clip(&clip).is_none());

        assert_eq!(first.start_time, 10.0);
        assert_eq!(first.duration, 5.0);
        assert_eq!(first.trim_end, 15.0);
        assert_eq!(first.trim_start, 0.0);

        assert_eq!(second.start_time, 15.0);
        assert_eq!(second.duration, 15.0);
        assert_eq!(second.trim_start, 5.0);
        assert_eq!(second.trim_end, 0.0);

        assert_eq!(first.duration + second.duration, 20.0);
        assert_eq!(store.selected_clip_ids(), &[first.id, second.id]);
    }

    #[test]
    fn split_at_clip_edges_is_a_no_op() {
        let (mut store, clip) = split_fixture();
        let before = store.tracks().to_vec();
        let history = store.history_len();

        assert!(!store.split_clip(&clip, 10.0));
        assert!(!store.split_clip(&clip, 30.0));
        assert!(!store.split_clip("missing", 12.0));

        assert_eq!(store.tracks(), before.as_slice());
        assert_eq!(store.history_len(), history);
    }

    #[test]
    fn undo_and_redo_walk_the_whole_history() {
        let mut store = EditorStore::default();
        assert!(!store.undo());
        let media = store
            .add_media(MediaItem::new(MediaKind::Video, "a.webm", "/tmp/a.webm", 100.0))
            .unwrap();

        // add track + 3 clips = 4 mutations
        let track = store.add_track(TrackKind::Video);
        let mut last = String::new();
        for i in 0..3 {
            last = store
                .add_clip(&track, NewClip::new(&media, i as f64 * 10.0).with_duration(5.0))
                .unwrap();
        }
        store.select_clip(&last, false).unwrap();
        let latest = store.tracks().to_vec();

        for _ in 0..4 {
            assert!(store.undo());
            assert!(store.selected_clip_ids().is_empty());
        }
        assert!(!store.undo());
        assert!(store.tracks().is_empty());
        assert_eq!(store.duration(), 0.0);

        for _ in 0..4 {
            assert!(store.redo());
            assert!(store.selected_clip_ids().is_empty());
        }
        assert!(!store.redo());
        assert_eq!(store.tracks(), latest.as_slice());
        assert_eq!(store.duration(), 25.0);
    }

    #[test]
    fn history_is_bounded() {
        let mut store = EditorStore::default();
        for _ in 0..60 {
            store.add_track(TrackKind::Audio);
        }
        assert!(store.history_len() <= 50);

        let mut undone = 0;
        while store.undo() {
            undone += 1;
        }
        assert_eq!(undone, 49);
        // the ten oldest states, including the empty timeline, are gone
        assert_eq!(store.tracks().len(), 11);
    }

    #[test]
    fn live_updates_skip_history_until_committed() {
        let (mut store, clip) = split_fixture();
        let depth = store.history_len();

        for step in 1..=5 {
            let update = ClipUpdate {
                start_time: Some(10.0 + step as f64),
                ..ClipUpdate::default()
            };
            store.update_clip(&clip, update, HistoryMode::Live).unwrap();
        }
        assert_eq!(store.history_len(), depth);
        assert_eq!(store.duration(), 35.0);

        store.commit_history();
        assert_eq!(store.history_len(), depth + 1);
        assert!(store.undo());
        assert_eq!(store.clip(&clip).unwrap().start_time, 10.0);
    }

    #[test]
    fn invalid_trims_are_rejected_without_changes() {
        let (mut store, clip) = split_fixture();
        let before = store.clip(&clip).unwrap().clone();

        let update = ClipUpdate {
            trim_start: Some(30.0),
            trim_end: Some(30.0),
            ..ClipUpdate::default()
        };
        let err = store.update_clip(&clip, update, HistoryMode::Record).unwrap_err();
        assert_eq!(err.code(), "INVALID_VALUE");
        assert_eq!(store.clip(&clip), Some(&before));
    }

    #[test]
    fn removing_media_cascades_to_clips() {
        let (mut store, media, track) = store_with_video(10.0);
        let clip = store.add_clip(&track, NewClip::new(&media, 0.0)).unwrap();
        store.select_clip(&clip, false).unwrap();

        store.remove_media(&media).unwrap();
        assert!(store.clip(&clip).is_none());
        assert!(store.selected_clip_ids().is_empty());
        assert_eq!(store.duration(), 0.0);
        assert!(store.media().is_empty());
    }

    #[test]
    fn locked_tracks_refuse_edits() {
        let (mut store, media, track) = store_with_video(10.0);
        let clip = store.add_clip(&track, NewClip::new(&media, 0.0)).unwrap();
        store
            .update_track(
                &track,
                TrackUpdate {
                    locked: Some(true),
                    ..TrackUpdate::default()
                },
            )
            .unwrap();

        assert!(matches!(store.remove_clip(&clip), Err(ReelError::TrackLocked(_))));
        assert!(!store.split_clip(&clip, 5.0));
    }

    #[test]
    fn clips_move_between_compatible_tracks() {
        let (mut store, media, track) = store_with_video(10.0);
        let clip = store.add_clip(&track, NewClip::new(&media, 0.0)).unwrap();
        let audio = store.add_track(TrackKind::Audio);
        let text = store.add_track(TrackKind::Text);

        let to_text = ClipUpdate {
            track_id: Some(text),
            ..ClipUpdate::default()
        };
        assert!(store.update_clip(&clip, to_text, HistoryMode::Record).is_err());

        let to_audio = ClipUpdate {
            track_id: Some(audio.clone()),
            ..ClipUpdate::default()
        };
        store.update_clip(&clip, to_audio, HistoryMode::Record).unwrap();
        assert!(store.track(&track).unwrap().clips.is_empty());
        assert_eq!(store.clip(&clip).unwrap().track_id, audio);
    }

    #[test]
    fn playhead_and_zoom_are_clamped() {
        let (mut store, _clip) = split_fixture();
        store.set_current_time(99.0);
        assert_eq!(store.current_time(), 30.0);
        store.set_current_time(-1.0);
        assert_eq!(store.current_time(), 0.0);
        store.set_zoom(1000.0);
        assert_eq!(store.zoom(), 200.0);
    }

    #[test]
    fn zoom_level_outside_range_is_rejected() {
        let mut store = EditorStore::default();
        let segment = ZoomSegment {
            id: "z".into(),
            start_time: 0.0,
            duration: 3.0,
            zoom_level: 0.5,
            mode: ZoomMode::Manual,
            target_x: 0.5,
            target_y: 0.5,
        };
        assert!(store.add_zoom_segment(segment.clone()).is_err());

        store
            .add_zoom_segment(ZoomSegment {
                zoom_level: 1.5,
                ..segment
            })
            .unwrap();
        let update = ZoomSegmentUpdate {
            zoom_level: Some(2.5),
            ..ZoomSegmentUpdate::default()
        };
        assert!(store.update_zoom_segment("z", update).is_err());
        assert_eq!(store.zoom_segment("z").unwrap().zoom_level, 1.5);
    }

    #[test]
    fn subscribers_see_revisions() {
        let mut store = EditorStore::default();
        let rx = store.subscribe();
        let before = *rx.borrow();
        store.add_track(TrackKind::Video);
        assert!(*rx.borrow() > before);
    }
}
