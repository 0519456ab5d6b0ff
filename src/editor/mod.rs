pub mod coords;
pub mod export;
pub mod history;
pub mod interaction;
pub mod project;
pub mod store;
pub mod types;
pub mod zoom;

pub use export::{plan_export, ExportClip, ExportSettings, FfmpegExporter};
pub use interaction::{ClipInteraction, GestureKind};
pub use project::ProjectFile;
pub use store::{EditorStore, HistoryMode};
pub use types::{
    ClipUpdate, CursorPoint, MediaItem, MediaKind, NewClip, TimelineClip, TimelineTrack,
    TrackKind, TrackUpdate, ZoomMode, ZoomSegment, ZoomSegmentUpdate,
};
pub use zoom::{click_zoom_lane, zoom_at, ZoomFocus, ZoomLaneClick};
