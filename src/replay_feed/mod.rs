//! ReplayFeed - Recorded tracker output played back as a camera
//!
//! ## Responsibilities
//!
//! - Read JSON-lines recordings (one line per frame)
//! - Paint a synthetic frame per line (gray background, each track's box
//!   filled with its recorded colour) so crops carry an appearance
//! - Hand the recorded tracks to the paired tracker for the same frame
//!
//! ## Line format
//!
//! ```text
//! {"tracks":[{"track_id":1,"bbox":[x1,y1,x2,y2],"confidence":0.9,"confirmed":true,
//!             "hits":3,"age":3,"frames_since_update":0,"color":[r,g,b]}]}
//! {"dropped":true}
//! ```
//!
//! A `dropped` line is a transient read failure.

mod histogram;

pub use histogram::ColorHistogramExtractor;

use crate::error::Result;
use crate::vision::{FrameSource, PersonTracker, SourceError, SourceInfo, TrackObservation};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

const BACKGROUND: Rgb<u8> = Rgb([114, 114, 114]);
const DEFAULT_FPS: f32 = 30.0;

/// Recorded track with its painted colour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayTrack {
    #[serde(flatten)]
    pub observation: TrackObservation,
    #[serde(default = "default_color")]
    pub color: [u8; 3],
}

fn default_color() -> [u8; 3] {
    [255, 255, 255]
}

/// One recorded frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    #[serde(default)]
    pub tracks: Vec<ReplayTrack>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dropped: bool,
}

impl ReplayFrame {
    pub fn with_tracks(tracks: Vec<ReplayTrack>) -> Self {
        Self {
            tracks,
            dropped: false,
        }
    }

    pub fn dropped() -> Self {
        Self {
            tracks: Vec::new(),
            dropped: true,
        }
    }
}

/// Parse a recording. Blank lines are ignored.
pub fn parse_recording(raw: &str) -> Result<Vec<ReplayFrame>> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}

type TrackSlot = Arc<Mutex<Vec<TrackObservation>>>;

enum Recording {
    File(PathBuf),
    Memory { name: String, frames: Vec<ReplayFrame> },
}

/// Recorded feed acting as a camera
pub struct ReplaySource {
    recording: Recording,
    frames: Vec<ReplayFrame>,
    cursor: usize,
    opened: bool,
    width: u32,
    height: u32,
    slot: TrackSlot,
}

impl ReplaySource {
    /// Feed backed by a JSON-lines file (read on `open`)
    pub fn from_path(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self::with_recording(Recording::File(path.into()), width, height)
    }

    /// Feed backed by in-memory frames
    pub fn from_frames(name: impl Into<String>, frames: Vec<ReplayFrame>, width: u32, height: u32) -> Self {
        Self::with_recording(
            Recording::Memory {
                name: name.into(),
                frames,
            },
            width,
            height,
        )
    }

    fn with_recording(recording: Recording, width: u32, height: u32) -> Self {
        Self {
            recording,
            frames: Vec::new(),
            cursor: 0,
            opened: false,
            width,
            height,
            slot: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Tracker answering with the tracks recorded for the frame last read
    pub fn tracker(&self) -> ReplayTracker {
        ReplayTracker {
            slot: self.slot.clone(),
        }
    }

    fn paint(&self, frame: &ReplayFrame) -> RgbImage {
        let mut image = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        for track in &frame.tracks {
            let b = &track.observation.bbox;
            let (w, h) = (b.width() as u32, b.height() as u32);
            if w == 0 || h == 0 {
                continue;
            }
            let rect = Rect::at(b.x1 as i32, b.y1 as i32).of_size(w, h);
            draw_filled_rect_mut(&mut image, rect, Rgb(track.color));
        }
        image
    }

    fn publish_tracks(&self, tracks: Vec<TrackObservation>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = tracks;
    }
}

impl FrameSource for ReplaySource {
    fn open(&mut self) -> std::result::Result<SourceInfo, SourceError> {
        self.frames = match &self.recording {
            Recording::File(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| SourceError::Closed(format!("{}: {}", path.display(), e)))?;
                parse_recording(&raw)
                    .map_err(|e| SourceError::Closed(format!("{}: {}", path.display(), e)))?
            }
            Recording::Memory { frames, .. } => frames.clone(),
        };
        self.cursor = 0;
        self.opened = true;
        self.publish_tracks(Vec::new());

        Ok(SourceInfo {
            width: self.width,
            height: self.height,
            fps: DEFAULT_FPS,
        })
    }

    fn read(&mut self) -> std::result::Result<RgbImage, SourceError> {
        if !self.opened {
            return Err(SourceError::Closed("replay not opened".to_string()));
        }
        let Some(frame) = self.frames.get(self.cursor) else {
            self.publish_tracks(Vec::new());
            return Err(SourceError::Exhausted);
        };
        self.cursor += 1;

        if frame.dropped {
            self.publish_tracks(Vec::new());
            return Err(SourceError::Transient("recorded frame dropped".to_string()));
        }

        let image = self.paint(frame);
        self.publish_tracks(frame.tracks.iter().map(|t| t.observation.clone()).collect());
        Ok(image)
    }

    fn rewind(&mut self) -> bool {
        if !self.opened {
            return false;
        }
        self.cursor = 0;
        true
    }

    fn release(&mut self) {
        self.opened = false;
        self.frames.clear();
        self.cursor = 0;
        self.publish_tracks(Vec::new());
    }

    fn describe(&self) -> String {
        match &self.recording {
            Recording::File(path) => path.display().to_string(),
            Recording::Memory { name, .. } => name.clone(),
        }
    }
}

/// Tracker paired with a [`ReplaySource`]
pub struct ReplayTracker {
    slot: TrackSlot,
}

impl PersonTracker for ReplayTracker {
    fn update(&mut self, _frame: &RgbImage) -> Result<Vec<TrackObservation>> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(std::mem::take(&mut *slot))
    }
}
