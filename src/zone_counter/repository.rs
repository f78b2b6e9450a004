//! Per-camera zone files
//!
//! File layout: ordered JSON list of `{id, coords: [x1,y1,x2,y2], threshold}`.

use super::types::ZoneDefinition;
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Reads / writes one camera's zone file
#[derive(Debug, Clone)]
pub struct ZoneRepository {
    path: PathBuf,
}

impl ZoneRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load zone definitions in file order.
    ///
    /// Missing file = no zones. Entries without usable coords are skipped.
    pub fn load(&self) -> Result<Vec<ZoneDefinition>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&self.path)?;
        let entries: Vec<serde_json::Value> = serde_json::from_str(&raw)?;

        let mut zones = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<ZoneDefinition>(entry) {
                Ok(zone) => zones.push(zone.normalized()),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Skipping malformed zone entry"
                    );
                }
            }
        }
        Ok(zones)
    }

    /// Replace the file contents with `zones`
    pub fn save(&self, zones: &[ZoneDefinition]) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(zones)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
