use serde::{Deserialize, Serialize};
use std::path::Path;

use super::store::{validate_clip, validate_zoom_segment, EditorStore};
use super::types::{MediaItem, TimelineTrack, ZoomSegment};
use crate::error::{ReelError, Result};

pub const PROJECT_VERSION: u32 = 1;

/// On-disk form of an editor session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    pub version: u32,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub tracks: Vec<TimelineTrack>,
    #[serde(default)]
    pub zoom_segments: Vec<ZoomSegment>,
    #[serde(default = "default_zoom")]
    pub zoom: f64,
}

fn default_zoom() -> f64 {
    super::coords::DEFAULT_ZOOM
}

impl ProjectFile {
    pub fn capture(store: &EditorStore) -> Self {
        Self {
            version: PROJECT_VERSION,
            media: store.media().to_vec(),
            tracks: store.tracks().to_vec(),
            zoom_segments: store.zoom_segments().to_vec(),
            zoom: store.zoom(),
        }
    }

    /// Load the project into `store`, replacing its contents and history.
    pub fn restore(self, store: &mut EditorStore) -> Result<()> {
        if self.version > PROJECT_VERSION {
            return Err(ReelError::invalid(
                "version",
                format!("project version {} is newer than supported {}", self.version, PROJECT_VERSION),
            ));
        }
        for track in &self.tracks {
            for clip in &track.clips {
                if clip.track_id != track.id {
                    return Err(ReelError::invalid(
                        "trackId",
                        format!("clip {} claims track {} but sits on {}", clip.id, clip.track_id, track.id),
                    ));
                }
                validate_clip(clip, &self.media)?;
            }
        }
        for segment in &self.zoom_segments {
            validate_zoom_segment(segment)?;
        }
        store.replace_contents(self.media, self.tracks, self.zoom_segments, self.zoom);
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}
