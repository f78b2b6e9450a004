//! Vision boundary types

use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Integer centroid, truncated the same way for every camera
    pub fn centroid(&self) -> (i32, i32) {
        (
            ((self.x1 + self.x2) / 2.0) as i32,
            ((self.y1 + self.y2) / 2.0) as i32,
        )
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One tracker output for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackObservation {
    /// Tracker-local id, only unique per camera
    #[serde(rename = "track_id")]
    pub local_track_id: u64,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub confirmed: bool,
    /// Number of detections associated so far
    #[serde(default, rename = "hits")]
    pub hit_count: u32,
    #[serde(default)]
    pub age: u32,
    /// Frames since the track was last matched to a detection
    #[serde(default)]
    pub frames_since_update: u32,
}

impl TrackObservation {
    /// Eligible for identity resolution and zone counting
    pub fn is_countable(&self, max_staleness: u32) -> bool {
        (self.confirmed || self.hit_count >= 1) && self.frames_since_update <= max_staleness
    }

    /// Counts toward the per-camera live occupancy
    pub fn is_live(&self, live_staleness: u32) -> bool {
        self.confirmed && self.frames_since_update <= live_staleness
    }
}

/// Metadata reported by an opened source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
}

/// Camera feed failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// Read failed but the handle is still usable; worth retrying
    #[error("transient read failure: {0}")]
    Transient(String),

    /// End of a finite source (file / recording)
    #[error("source exhausted")]
    Exhausted,

    /// Handle lost for good
    #[error("source closed: {0}")]
    Closed(String),
}
