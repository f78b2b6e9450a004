//! ZoneCounter - Per-zone occupancy with boundary hysteresis
//!
//! ## Responsibilities
//!
//! - Live occupancy (identities currently inside the rectangle)
//! - Cumulative unique sessions (`total_count`)
//! - Threshold alerts with a per-zone cool-down
//!
//! ## State machine (per identity)
//!
//! ```text
//!   NEW --enter--> ACTIVE --exit--> COUNTED_AWAY --enter--> ACTIVE (no recount)
//!                                        |
//!                                        +-- outside > hysteresis --> NEW
//! ```
//!
//! Tentative (non-positive) ids never transition.

mod repository;
mod types;

pub use repository::ZoneRepository;
pub use types::*;

use crate::identity_gallery::{is_confirmed, GlobalId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// One counting zone
#[derive(Debug, Clone)]
pub struct ZoneCounter {
    definition: ZoneDefinition,
    hysteresis_frames: u32,
    alert_cooldown: Duration,
    active_ids: BTreeSet<GlobalId>,
    counted_ids: BTreeSet<GlobalId>,
    frames_outside: HashMap<GlobalId, u32>,
    total_count: u64,
    last_alert_at: Option<DateTime<Utc>>,
}

impl ZoneCounter {
    pub fn new(definition: ZoneDefinition, hysteresis_frames: u32, alert_cooldown: Duration) -> Self {
        Self {
            definition: definition.normalized(),
            hysteresis_frames,
            alert_cooldown,
            active_ids: BTreeSet::new(),
            counted_ids: BTreeSet::new(),
            frames_outside: HashMap::new(),
            total_count: 0,
            last_alert_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn definition(&self) -> &ZoneDefinition {
        &self.definition
    }

    /// Swap in a new rectangle / threshold, keeping the counting state
    pub fn redefine(&mut self, definition: ZoneDefinition) {
        self.definition = definition.normalized();
    }

    /// Live occupancy
    pub fn count(&self) -> usize {
        self.active_ids.len()
    }

    /// Cumulative unique sessions
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn active_ids(&self) -> &BTreeSet<GlobalId> {
        &self.active_ids
    }

    pub fn contains(&self, centroid: (i32, i32)) -> bool {
        self.definition.contains(centroid)
    }

    /// Current state of `global_id` in this zone
    pub fn state_of(&self, global_id: GlobalId) -> OccupancyState {
        if self.active_ids.contains(&global_id) {
            OccupancyState::Active
        } else if self.counted_ids.contains(&global_id) {
            OccupancyState::CountedAway
        } else {
            OccupancyState::New
        }
    }

    /// Feed one observation of `global_id` at `centroid`
    pub fn observe(&mut self, global_id: GlobalId, centroid: (i32, i32)) -> Option<ZoneTransition> {
        if !is_confirmed(global_id) {
            return None;
        }

        if self.definition.contains(centroid) {
            self.frames_outside.remove(&global_id);
            if !self.active_ids.insert(global_id) {
                return None;
            }
            let counted = self.counted_ids.insert(global_id);
            if counted {
                self.total_count += 1;
            }
            tracing::debug!(
                zone_id = %self.definition.id,
                global_id = global_id,
                counted = counted,
                total_count = self.total_count,
                "Identity entered zone"
            );
            return Some(ZoneTransition::Entered { counted });
        }

        let left = self.active_ids.remove(&global_id);
        if !self.counted_ids.contains(&global_id) {
            return left.then_some(ZoneTransition::Left);
        }

        let outside = self.frames_outside.entry(global_id).or_insert(0);
        *outside += 1;
        if *outside > self.hysteresis_frames {
            self.frames_outside.remove(&global_id);
            self.counted_ids.remove(&global_id);
            tracing::debug!(
                zone_id = %self.definition.id,
                global_id = global_id,
                "Identity session expired"
            );
            return Some(ZoneTransition::Expired);
        }

        if left {
            tracing::debug!(
                zone_id = %self.definition.id,
                global_id = global_id,
                "Identity left zone"
            );
            Some(ZoneTransition::Left)
        } else {
            None
        }
    }

    /// Drop `global_id` from the live set immediately (track vanished).
    /// Session bookkeeping is left to the hysteresis window.
    pub fn remove(&mut self, global_id: GlobalId) -> bool {
        self.active_ids.remove(&global_id)
    }

    /// Evict every active id not in `present`
    pub fn retain_present(&mut self, present: &BTreeSet<GlobalId>) -> Vec<GlobalId> {
        let gone: Vec<GlobalId> = self.active_ids.difference(present).copied().collect();
        for id in &gone {
            self.remove(*id);
        }
        gone
    }

    /// Emit an alert when over threshold and outside the cool-down
    pub fn check_alert(&mut self, now: DateTime<Utc>) -> Option<ZoneAlert> {
        let count = self.count();
        if count <= self.definition.threshold as usize {
            return None;
        }

        if let Some(last) = self.last_alert_at {
            let elapsed = now.signed_duration_since(last).to_std().unwrap_or_default();
            if elapsed < self.alert_cooldown {
                return None;
            }
        }

        self.last_alert_at = Some(now);
        Some(ZoneAlert {
            zone_id: self.definition.id.clone(),
            count,
            threshold: self.definition.threshold,
            message: format!(
                "Occupancy exceeded! ({}/{})",
                count, self.definition.threshold
            ),
            timestamp: now,
        })
    }

    pub fn status(&self, name: String) -> ZoneStatus {
        ZoneStatus {
            name,
            count: self.count(),
            total_count: self.total_count,
            coords: self.definition.coords,
            threshold: self.definition.threshold,
        }
    }
}
