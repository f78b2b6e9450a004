//! Identity gallery types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Durable person id. Positive = confirmed identity, negative = tentative
/// sentinel derived from the local track id (never counted).
pub type GlobalId = i64;

/// Whether an id refers to a confirmed identity
pub fn is_confirmed(id: GlobalId) -> bool {
    id > 0
}

/// Sentinel returned while a track has no identity yet
pub fn tentative_id(local_track_id: u64) -> GlobalId {
    -(local_track_id.clamp(1, i64::MAX as u64) as i64)
}

/// (camera, tracker-local id) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackKey {
    pub camera_id: String,
    pub local_track_id: u64,
}

impl TrackKey {
    pub fn new(camera_id: impl Into<String>, local_track_id: u64) -> Self {
        Self {
            camera_id: camera_id.into(),
            local_track_id,
        }
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.camera_id, self.local_track_id)
    }
}

/// Gallery entry
#[derive(Debug, Clone)]
pub struct GlobalIdentity {
    pub id: GlobalId,
    /// Ring buffer of L2-normalized embeddings
    pub embeddings: VecDeque<Vec<f32>>,
    pub last_seen: DateTime<Utc>,
}

impl GlobalIdentity {
    pub fn new(id: GlobalId, capacity: usize, last_seen: DateTime<Utc>) -> Self {
        Self {
            id,
            embeddings: VecDeque::with_capacity(capacity),
            last_seen,
        }
    }

    /// Append, evicting the oldest embedding beyond `capacity`
    pub fn push_embedding(&mut self, embedding: Vec<f32>, capacity: usize) {
        while self.embeddings.len() >= capacity.max(1) {
            self.embeddings.pop_front();
        }
        self.embeddings.push_back(embedding);
    }
}

/// How a resolve call was answered
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// Track already bound; no embedding work done
    Bound(GlobalId),
    /// First observation matched a stored embedding
    Matched { id: GlobalId, similarity: f32 },
    /// Averaged pending embeddings matched on the second chance
    MatchedAverage { id: GlobalId, similarity: f32 },
    /// New identity allocated
    Created(GlobalId),
    /// Buffered; waiting for more observations
    Pending { observations: usize },
    /// Embedding extraction failed
    ExtractionFailed,
    /// Every positive id has been handed out
    IdsExhausted,
}

/// Matching parameters
#[derive(Debug, Clone, PartialEq)]
pub struct GallerySettings {
    pub similarity_threshold: f32,
    pub gallery_size: usize,
    pub confirm_frames: usize,
    pub memory_horizon: std::time::Duration,
}

impl Default for GallerySettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.65,
            gallery_size: 5,
            confirm_frames: 1,
            memory_horizon: std::time::Duration::from_secs(63_072_000),
        }
    }
}

impl From<&crate::state::PipelineSettings> for GallerySettings {
    fn from(s: &crate::state::PipelineSettings) -> Self {
        Self {
            similarity_threshold: s.similarity_threshold,
            gallery_size: s.gallery_size,
            confirm_frames: s.confirm_frames.max(1),
            memory_horizon: s.memory_horizon,
        }
    }
}
