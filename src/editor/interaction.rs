//! Pointer gestures on timeline clips.
//!
//! A gesture lives from pointer-down to pointer-up. While it is active every
//! pointer move is applied as a live update that stays out of the undo
//! history; releasing the pointer commits a single history entry.

use super::coords::delta_to_time;
use super::store::{EditorStore, HistoryMode};
use super::types::{ClipUpdate, TimelineClip};
use crate::error::{ReelError, Result};

/// Shortest clip a resize can produce, in seconds
pub const MIN_CLIP_DURATION: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    Move,
    ResizeLeft,
    ResizeRight,
}

#[derive(Debug, Clone)]
struct ClipGesture {
    kind: GestureKind,
    origin: TimelineClip,
    pointer_start_x: f64,
    zoom: f64,
    moved: bool,
}

impl ClipGesture {
    /// Clip geometry for a pointer at `pointer_x`, relative to the clip as
    /// it was on pointer-down.
    fn update_for(&self, pointer_x: f64) -> ClipUpdate {
        let dt = delta_to_time(pointer_x - self.pointer_start_x, self.zoom);
        let o = &self.origin;
        match self.kind {
            GestureKind::Move => ClipUpdate {
                start_time: Some((o.start_time + dt).max(0.0)),
                ..ClipUpdate::default()
            },
            GestureKind::ResizeLeft => {
                // right edge stays put; left edge and source trim move together
                let lower = (-o.trim_start).max(-o.start_time);
                let upper = o.duration - MIN_CLIP_DURATION;
                let dt = dt.clamp(lower, upper.max(lower));
                ClipUpdate {
                    start_time: Some(o.start_time + dt),
                    duration: Some(o.duration - dt),
                    trim_start: Some(o.trim_start + dt),
                    ..ClipUpdate::default()
                }
            }
            GestureKind::ResizeRight => {
                let lower = MIN_CLIP_DURATION - o.duration;
                let upper = o.trim_end;
                let dt = dt.clamp(lower.min(upper), upper);
                ClipUpdate {
                    duration: Some(o.duration + dt),
                    trim_end: Some(o.trim_end - dt),
                    ..ClipUpdate::default()
                }
            }
        }
    }
}

/// Owns the drag state for one timeline view. Only one gesture can be in
/// flight at a time.
#[derive(Debug, Default)]
pub struct ClipInteraction {
    active: Option<ClipGesture>,
}

impl ClipInteraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_clip(&self) -> Option<&str> {
        self.active.as_ref().map(|g| g.origin.id.as_str())
    }

    /// Pointer-down on a clip body or edge.
    pub fn begin(
        &mut self,
        store: &mut EditorStore,
        clip_id: &str,
        kind: GestureKind,
        pointer_x: f64,
    ) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(ReelError::GestureInProgress(active.origin.id.clone()));
        }
        let origin = store
            .clip(clip_id)
            .cloned()
            .ok_or_else(|| ReelError::ClipNotFound(clip_id.to_string()))?;
        if store.track(&origin.track_id).is_some_and(|t| t.locked) {
            return Err(ReelError::TrackLocked(origin.track_id));
        }
        if !store.selected_clip_ids().iter().any(|id| id == clip_id) {
            store.select_clip(clip_id, false)?;
        }

        tracing::debug!(clip = clip_id, ?kind, "gesture started");
        self.active = Some(ClipGesture {
            kind,
            origin,
            pointer_start_x: pointer_x,
            zoom: store.zoom(),
            moved: false,
        });
        Ok(())
    }

    /// Pointer-move. Updates the store without touching history; positions
    /// the store rejects are skipped and the clip keeps its last valid shape.
    pub fn update(&mut self, store: &mut EditorStore, pointer_x: f64) {
        let Some(gesture) = self.active.as_mut() else {
            return;
        };
        let update = gesture.update_for(pointer_x);
        match store.update_clip(&gesture.origin.id, update, HistoryMode::Live) {
            Ok(()) => gesture.moved = true,
            Err(e) => tracing::debug!(error = %e, "gesture update rejected"),
        }
    }

    /// Pointer-up. Commits one history entry if the clip changed.
    pub fn finish(&mut self, store: &mut EditorStore) -> bool {
        let Some(gesture) = self.active.take() else {
            return false;
        };
        let changed = gesture.moved && store.clip(&gesture.origin.id) != Some(&gesture.origin);
        if changed {
            store.commit_history();
        }
        tracing::debug!(clip = %gesture.origin.id, changed, "gesture finished");
        changed
    }

    /// Abort the gesture and put the clip back where it started.
    pub fn cancel(&mut self, store: &mut EditorStore) {
        let Some(gesture) = self.active.take() else {
            return;
        };
        if gesture.moved {
            let o = gesture.origin;
            let restore = ClipUpdate {
                start_time: Some(o.start_time),
                duration: Some(o.duration),
                trim_start: Some(o.trim_start),
                trim_end: Some(o.trim_end),
                ..ClipUpdate::default()
            };
            if let Err(e) = store.update_clip(&o.id, restore, HistoryMode::Live) {
                tracing::warn!(clip = %o.id, error = %e, "could not restore clip after cancelled gesture");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::types::{MediaItem, MediaKind, NewClip, TrackKind};

    /// 30 s media, clip placed at 10 s showing source 5..25 s; zoom 100 px/s
    fn fixture() -> (EditorStore, String) {
        let mut store = EditorStore::default();
        store.set_zoom(100.0);
        let media = store
            .add_media(MediaItem::new(MediaKind::Video, "rec", "/tmp/rec.webm", 30.0))
            .unwrap();
        let track = store.add_track(TrackKind::Video);
        let mut clip = NewClip::new(&media, 10.0).with_duration(20.0);
        clip.trim_start = 5.0;
        clip.trim_end = 5.0;
        let id = store.add_clip(&track, clip).unwrap();
        (store, id)
    }

    #[test]
    fn move_converts_pixels_through_zoom() {
        let (mut store, clip) = fixture();
        let mut drag = ClipInteraction::new();
        drag.begin(&mut store, &clip, GestureKind::Move, 500.0).unwrap();
        drag.update(&mut store, 750.0);
        assert_eq!(store.clip(&clip).unwrap().start_time, 12.5);

        drag.update(&mut store, -5000.0);
        assert_eq!(store.clip(&clip).unwrap().start_time, 0.0);
    }

    #[test]
    fn left_resize_keeps_the_right_edge_fixed() {
        let (mut store, clip) = fixture();
        let mut drag = ClipInteraction::new();
        drag.begin(&mut store, &clip, GestureKind::ResizeLeft, 1000.0).unwrap();

        drag.update(&mut store, 1200.0);
        let c = store.clip(&clip).unwrap();
        assert_eq!(c.start_time, 12.0);
        assert_eq!(c.duration, 18.0);
        assert_eq!(c.trim_start, 7.0);
        assert_eq!(c.end_time(), 30.0);

        // cannot reveal more source than exists before trimStart
        drag.update(&mut store, 0.0);
        let c = store.clip(&clip).unwrap();
        assert_eq!(c.trim_start, 0.0);
        assert_eq!(c.start_time, 5.0);
        assert_eq!(c.end_time(), 30.0);
    }

    #[test]
    fn right_resize_trades_duration_for_trim_end() {
        let (mut store, clip) = fixture();
        let mut drag = ClipInteraction::new();
        drag.begin(&mut store, &clip, GestureKind::ResizeRight, 3000.0).unwrap();

        drag.update(&mut store, 2500.0);
        let c = store.clip(&clip).unwrap();
        assert_eq!(c.duration, 15.0);
        assert_eq!(c.trim_end, 10.0);

        drag.update(&mut store, 9000.0);
        let c = store.clip(&clip).unwrap();
        assert_eq!(c.duration, 25.0);
        assert_eq!(c.trim_end, 0.0);
    }

    #[test]
    fn a_whole_drag_is_one_undo_step() {
        let (mut store, clip) = fixture();
        let depth = store.history_len();
        let mut drag = ClipInteraction::new();

        drag.begin(&mut store, &clip, GestureKind::Move, 0.0).unwrap();
        for x in (10..=300).step_by(10) {
            drag.update(&mut store, x as f64);
        }
        assert!(drag.finish(&mut store));
        assert_eq!(store.history_len(), depth + 1);

        assert!(store.undo());
        assert_eq!(store.clip(&clip).unwrap().start_time, 10.0);
    }

    #[test]
    fn click_without_movement_records_nothing() {
        let (mut store, clip) = fixture();
        let depth = store.history_len();
        let mut drag = ClipInteraction::new();
        drag.begin(&mut store, &clip, GestureKind::Move, 40.0).unwrap();
        assert!(!drag.finish(&mut store));
        assert_eq!(store.history_len(), depth);
    }

    #[test]
    fn gestures_do_not_interleave() {
        let (mut store, clip) = fixture();
        let mut drag = ClipInteraction::new();
        drag.begin(&mut store, &clip, GestureKind::Move, 0.0).unwrap();
        let err = drag
            .begin(&mut store, &clip, GestureKind::ResizeLeft, 0.0)
            .unwrap_err();
        assert!(matches!(err, ReelError::GestureInProgress(_)));
        assert_eq!(drag.active_clip(), Some(clip.as_str()));
    }

    #[test]
    fn cancel_restores_the_original_clip() {
        let (mut store, clip) = fixture();
        let original = store.clip(&clip).unwrap().clone();
        let mut drag = ClipInteraction::new();
        drag.begin(&mut store, &clip, GestureKind::ResizeLeft, 0.0).unwrap();
        drag.update(&mut store, 300.0);
        drag.cancel(&mut store);
        assert_eq!(store.clip(&clip), Some(&original));
        assert!(!drag.is_active());
    }
}
