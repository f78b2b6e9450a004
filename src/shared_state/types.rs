//! Shared state types

use crate::error::{Error, Result};
use crate::zone_counter::{ZoneDefinition, ZoneStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Per-camera metadata reported in the snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraMeta {
    pub source: String,
    /// `"{width}x{height}"`
    pub resolution: String,
    pub fps: f32,
    /// Delivering real frames (not blank substitutes)
    #[serde(default)]
    pub online: bool,
}

/// One occupancy sample (at most one per second)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub count: usize,
}

/// Aggregated read model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub live_count: usize,
    pub people_count: usize,
    pub total_visitors: u64,
    /// camera id -> zones
    pub zones: BTreeMap<String, Vec<ZoneStatus>>,
    /// camera id -> metadata
    pub cameras: BTreeMap<String, CameraMeta>,
    pub active_cameras: usize,
    /// Alerts raised since start
    pub alert_count: u64,
    /// Alerts waiting for persistence
    pub new_alerts: usize,
    pub history: VecDeque<HistoryPoint>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial snapshot update. Only these fields are mergeable; `None` leaves
/// the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub people_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_visitors: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<BTreeMap<String, Vec<ZoneStatus>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cameras: Option<BTreeMap<String, CameraMeta>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_cameras: Option<usize>,
}

impl SnapshotUpdate {
    /// Occupancy sample carried by this update, if any
    pub fn occupancy(&self) -> Option<usize> {
        self.people_count.or(self.live_count)
    }
}

/// Live reconfiguration command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConfigCommand {
    /// Flush every camera's zone definitions to disk
    SaveZones,
    /// Empty (and persist) one camera's zones, or all when no target
    ClearZones {
        #[serde(default, alias = "cam_id", alias = "targetCamera")]
        target_camera: Option<String>,
    },
    /// Replace (and persist) one camera's zones, or all when no target
    UpdateZones {
        #[serde(default, alias = "cam_id", alias = "targetCamera")]
        target_camera: Option<String>,
        #[serde(default, alias = "zone_defs")]
        zones: Vec<ZoneDefinition>,
    },
}

impl ConfigCommand {
    /// Parse a command from its JSON form
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::Validation(format!("malformed command: {}", e)))
    }

    pub fn action(&self) -> &'static str {
        match self {
            ConfigCommand::SaveZones => "save_zones",
            ConfigCommand::ClearZones { .. } => "clear_zones",
            ConfigCommand::UpdateZones { .. } => "update_zones",
        }
    }
}

/// Alert awaiting durable persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub zone_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_parsing() {
        let cmd = ConfigCommand::from_json(json!({"action": "save_zones"})).unwrap();
        assert_eq!(cmd, ConfigCommand::SaveZones);

        let cmd = ConfigCommand::from_json(json!({
            "action": "update_zones",
            "cam_id": "C1",
            "zones": [{"id": "A", "coords": [0, 0, 10, 10]}]
        }))
        .unwrap();
        match cmd {
            ConfigCommand::UpdateZones { target_camera, zones } => {
                assert_eq!(target_camera.as_deref(), Some("C1"));
                assert_eq!(zones[0].threshold, 10);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cmd = ConfigCommand::from_json(json!({"action": "clear_zones"})).unwrap();
        assert_eq!(cmd, ConfigCommand::ClearZones { target_camera: None });
    }

    #[test]
    fn test_update_zones_accepts_fractional_coords() {
        let cmd = ConfigCommand::from_json(json!({
            "action": "update_zones",
            "cam_id": "C1",
            "zones": [{"id": "A", "coords": [10.5, 20.0, 300.25, 200.0]}]
        }))
        .unwrap();
        match cmd {
            ConfigCommand::UpdateZones { zones, .. } => {
                assert_eq!(zones[0].coords, [11, 20, 300, 200]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_command_rejected() {
        assert!(ConfigCommand::from_json(json!({"action": "explode"})).is_err());
        assert!(ConfigCommand::from_json(json!({"zones": []})).is_err());
        assert!(ConfigCommand::from_json(json!({
            "action": "update_zones",
            "zones": [{"id": "A"}]
        }))
        .is_err());
    }

    #[test]
    fn test_update_occupancy_field() {
        assert_eq!(SnapshotUpdate::default().occupancy(), None);
        let update = SnapshotUpdate {
            live_count: Some(3),
            ..Default::default()
        };
        assert_eq!(update.occupancy(), Some(3));
    }
}
