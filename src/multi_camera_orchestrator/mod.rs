//! MultiCameraOrchestrator - Detection loop across all cameras
//!
//! ## Responsibilities
//!
//! - Drive every camera pipeline once per cycle
//! - Evict identities that vanished from a camera's zones
//! - Aggregate per-camera stats into the live snapshot (rate limited)
//! - Apply queued commands in arrival order
//! - Publish rendered frames (separately rate limited), optionally with a
//!   decaying heatmap blended in
//! - Release feeds, persist zones and flush the gallery on shutdown
//!
//! The loop is synchronous and runs on a blocking thread. It checks the
//! stop flag once per cycle; a hung camera read stalls the whole cycle.

mod camera_health;
mod camera_pipeline;
mod commands;
mod heatmap;
mod render;

pub use camera_health::{CameraHealth, FeedEvent, FeedStatus};
pub use camera_pipeline::{CameraCycle, CameraPipeline};
pub use commands::{apply_command, apply_commands};
pub use heatmap::HeatmapGrid;
pub use render::{draw_overlays, encode_jpeg, load_font, TrackOverlay};

use heatmap::OVERLAY_ALPHA;
use render::draw_camera_label;

use crate::error::Result;
use crate::identity_gallery::IdentityGallery;
use crate::shared_state::{AlertRecord, CameraMeta, SharedStateManager, SnapshotUpdate};
use crate::state::PipelineSettings;
use ab_glyph::FontVec;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// At least one camera delivered a real frame
    Processed,
    /// Only blank substitutes this cycle
    Idle,
    /// Every camera is closed
    AllSourcesLost,
}

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    StopRequested,
    AllSourcesLost,
}

/// MultiCameraOrchestrator instance (owned by the detection worker)
pub struct MultiCameraOrchestrator {
    cameras: Vec<CameraPipeline>,
    gallery: IdentityGallery,
    shared: Arc<SharedStateManager>,
    settings: PipelineSettings,
    /// Label font; `None` draws boxes only
    font: Option<FontVec>,
    max_reported_visitors: u64,
    last_snapshot_at: Option<Instant>,
    last_frame_publish_at: Option<Instant>,
    last_prune_at: Instant,
    cycles: u64,
}

impl MultiCameraOrchestrator {
    pub fn new(
        cameras: Vec<CameraPipeline>,
        gallery: IdentityGallery,
        shared: Arc<SharedStateManager>,
        settings: PipelineSettings,
    ) -> Self {
        let font = load_font(&settings.overlay_font);
        Self {
            cameras,
            gallery,
            shared,
            settings,
            font,
            max_reported_visitors: 0,
            last_snapshot_at: None,
            last_frame_publish_at: None,
            last_prune_at: Instant::now(),
            cycles: 0,
        }
    }

    pub fn cameras(&self) -> &[CameraPipeline] {
        &self.cameras
    }

    pub fn gallery(&self) -> &IdentityGallery {
        &self.gallery
    }

    /// Open every feed
    pub fn open_sources(&mut self) {
        for camera in &mut self.cameras {
            camera.open();
        }
        let open = self.cameras.iter().filter(|c| c.is_open()).count();
        tracing::info!(cameras = self.cameras.len(), open = open, "Camera sources opened");
    }

    /// Run until the stop flag is set or every source is lost, then shut down
    pub fn run(&mut self) -> LoopExit {
        self.open_sources();
        tracing::info!("Detection loop started");

        let exit = loop {
            if self.shared.is_stopped() {
                break LoopExit::StopRequested;
            }

            match self.run_cycle() {
                Ok(CycleOutcome::Processed) => pause(self.settings.busy_yield),
                Ok(CycleOutcome::Idle) => pause(self.settings.idle_backoff),
                Ok(CycleOutcome::AllSourcesLost) => {
                    tracing::error!("All camera sources lost, detection loop exiting");
                    break LoopExit::AllSourcesLost;
                }
                Err(e) => {
                    tracing::error!(error = %e, cycle = self.cycles, "Detection cycle failed");
                    pause(self.settings.error_backoff);
                }
            }
        };

        self.shutdown();
        tracing::info!(cycles = self.cycles, exit = ?exit, "Detection loop stopped");
        exit
    }

    /// One pass over every camera
    pub fn run_cycle(&mut self) -> Result<CycleOutcome> {
        self.run_cycle_at(Utc::now())
    }

    pub fn run_cycle_at(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        self.cycles += 1;

        let mut results: Vec<(usize, CameraCycle)> = Vec::with_capacity(self.cameras.len());
        for (i, camera) in self.cameras.iter_mut().enumerate() {
            if let Some(cycle) = camera.process(&mut self.gallery, &self.settings, now)? {
                results.push((i, cycle));
            }
        }

        if results.is_empty() && !self.cameras.iter().any(|c| c.is_open()) {
            return Ok(CycleOutcome::AllSourcesLost);
        }

        for (i, cycle) in &results {
            self.cameras[*i].evict_absent(&cycle.present);
        }
        self.raise_alerts(now);

        if due(&mut self.last_snapshot_at, self.settings.snapshot_interval) {
            let update = self.aggregate();
            self.shared.update_at(update, now);
        }

        let commands = self.shared.drain_commands();
        if !commands.is_empty() {
            apply_commands(&mut self.cameras, commands, &self.settings);
        }

        if due(&mut self.last_frame_publish_at, self.settings.frame_publish_interval) {
            self.publish_frames(results.iter_mut().map(|(i, c)| (*i, c)));
        }

        if self.last_prune_at.elapsed() >= self.settings.prune_interval {
            self.last_prune_at = Instant::now();
            self.gallery.prune(now);
        }

        if results.iter().any(|(_, c)| c.delivered) {
            Ok(CycleOutcome::Processed)
        } else {
            Ok(CycleOutcome::Idle)
        }
    }

    fn raise_alerts(&mut self, now: DateTime<Utc>) {
        for camera in &mut self.cameras {
            let label = camera.label();
            for alert in camera.check_alerts(now) {
                tracing::warn!(
                    camera_id = %camera.camera_id(),
                    zone_id = %alert.zone_id,
                    count = alert.count,
                    threshold = alert.threshold,
                    "Zone occupancy alert"
                );
                self.shared.enqueue_alert(AlertRecord {
                    zone_name: format!("{}: {}", label, alert.zone_id),
                    message: alert.message,
                    timestamp: alert.timestamp,
                });
            }
        }
    }

    /// Aggregated snapshot fields
    pub fn aggregate(&mut self) -> SnapshotUpdate {
        let live: usize = self.cameras.iter().map(|c| c.live_count()).sum();

        let current = self.gallery.allocated_count().max(live as u64);
        self.max_reported_visitors = self.max_reported_visitors.max(current);

        let mut zones = BTreeMap::new();
        let mut cameras = BTreeMap::new();
        for camera in &self.cameras {
            zones.insert(camera.camera_id().to_string(), camera.zone_statuses());
            cameras.insert(
                camera.camera_id().to_string(),
                CameraMeta {
                    source: camera.describe(),
                    resolution: format!("{}x{}", self.settings.frame_width, self.settings.frame_height),
                    fps: camera.fps(),
                    online: camera.health().status() == FeedStatus::Online,
                },
            );
        }

        SnapshotUpdate {
            live_count: Some(live),
            people_count: Some(live),
            total_visitors: Some(self.max_reported_visitors),
            zones: Some(zones),
            cameras: Some(cameras),
            active_cameras: Some(self.cameras.iter().filter(|c| c.is_open()).count()),
        }
    }

    fn publish_frames<'a>(&self, cycles: impl Iterator<Item = (usize, &'a mut CameraCycle)>) {
        for (i, cycle) in cycles {
            let camera = &self.cameras[i];
            draw_overlays(&mut cycle.frame, camera.zones(), &cycle.overlays, self.font.as_ref());
            if self.settings.heatmap_overlay {
                camera.heatmap().overlay(&mut cycle.frame, OVERLAY_ALPHA);
            }
            if let Some(font) = &self.font {
                draw_camera_label(&mut cycle.frame, i, font);
            }
            match encode_jpeg(&cycle.frame, self.settings.jpeg_quality) {
                Ok(jpeg) => self.shared.publish_frame(camera.camera_id(), jpeg),
                Err(e) => {
                    tracing::warn!(camera_id = %camera.camera_id(), error = %e, "Frame encode failed");
                }
            }
        }
    }

    /// Release feeds, persist zones, flush the gallery.
    /// Each step runs even when an earlier one fails.
    pub fn shutdown(&mut self) {
        for camera in &mut self.cameras {
            camera.release();
        }
        for camera in &self.cameras {
            if let Err(e) = camera.persist_zones() {
                tracing::error!(camera_id = %camera.camera_id(), error = %e, "Failed to persist zones");
            }
        }
        if let Err(e) = self.gallery.flush() {
            tracing::error!(error = %e, "Failed to flush identity gallery");
        }
        self.last_snapshot_at = None;
        self.last_frame_publish_at = None;
    }
}

/// Rate limiter: true (and rearm) when `interval` has elapsed
fn due(last: &mut Option<Instant>, interval: Duration) -> bool {
    let now = Instant::now();
    match last {
        Some(at) if now.duration_since(*at) < interval => false,
        _ => {
            *last = Some(now);
            true
        }
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests;
