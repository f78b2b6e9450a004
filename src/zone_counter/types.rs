//! Zone types

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

fn default_threshold() -> u32 {
    10
}

/// Corners may arrive as any JSON number; fractional pixels are rounded
fn deserialize_coords<'de, D>(deserializer: D) -> std::result::Result<[i32; 4], D::Error>
where
    D: Deserializer<'de>,
{
    let raw = <[f64; 4]>::deserialize(deserializer)?;
    let mut coords = [0i32; 4];
    for (out, value) in coords.iter_mut().zip(raw) {
        if !value.is_finite() {
            return Err(D::Error::custom("zone coordinate must be a finite number"));
        }
        *out = value.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32;
    }
    Ok(coords)
}

/// Persisted / commanded zone definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneDefinition {
    /// Zone name, unique per camera
    pub id: String,
    /// `[x1, y1, x2, y2]` in processing-resolution pixels
    #[serde(deserialize_with = "deserialize_coords")]
    pub coords: [i32; 4],
    /// Live occupancy above which an alert is raised
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

impl ZoneDefinition {
    pub fn new(id: impl Into<String>, coords: [i32; 4], threshold: u32) -> Self {
        Self {
            id: id.into(),
            coords,
            threshold,
        }
    }

    /// Reorder corners so that x1 <= x2 and y1 <= y2
    pub fn normalized(mut self) -> Self {
        let [x1, y1, x2, y2] = self.coords;
        self.coords = [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)];
        self
    }

    /// Inclusive point-in-rectangle test
    pub fn contains(&self, (px, py): (i32, i32)) -> bool {
        let [x1, y1, x2, y2] = self.coords;
        x1 <= px && px <= x2 && y1 <= py && py <= y2
    }
}

/// Per (zone, identity) occupancy state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyState {
    /// Not counted in this session (eligible for a fresh count)
    New,
    /// Inside the zone
    Active,
    /// Left the zone, still inside the hysteresis window
    CountedAway,
}

/// Result of feeding one observation to a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneTransition {
    /// NEW -> ACTIVE (counted) or COUNTED_AWAY -> ACTIVE (not recounted)
    Entered { counted: bool },
    /// ACTIVE -> COUNTED_AWAY
    Left,
    /// COUNTED_AWAY -> NEW, hysteresis window exceeded
    Expired,
}

/// Alert emitted by a zone over its threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneAlert {
    pub zone_id: String,
    pub count: usize,
    pub threshold: u32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Read model of one zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneStatus {
    pub name: String,
    pub count: usize,
    pub total_count: u64,
    pub coords: [i32; 4],
    pub threshold: u32,
}
