//! Per-camera frame pipeline
//!
//! read (retry / rewind / blank) -> resize -> track -> resolve identities ->
//! zone counting -> live count -> alerts

use super::camera_health::{CameraHealth, FeedEvent};
use super::heatmap::HeatmapGrid;
use super::render::TrackOverlay;
use crate::error::Result;
use crate::identity_gallery::{is_confirmed, GlobalId, IdentityGallery, TrackKey};
use crate::state::PipelineSettings;
use crate::vision::{crop, FrameSource, PersonTracker, SourceError, SourceInfo};
use crate::zone_counter::{ZoneAlert, ZoneCounter, ZoneDefinition, ZoneRepository, ZoneStatus};
use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use image::RgbImage;
use std::collections::BTreeSet;
use std::time::Instant;

/// Result of one camera's share of an orchestrator cycle
#[derive(Debug)]
pub struct CameraCycle {
    /// Whether a real frame (not a blank substitute) was processed
    pub delivered: bool,
    /// Processed frame, ready for overlays
    pub frame: RgbImage,
    pub overlays: Vec<TrackOverlay>,
    /// Confirmed identities observed in this frame
    pub present: BTreeSet<GlobalId>,
}

/// One camera: feed, tracker, zones
pub struct CameraPipeline {
    index: usize,
    camera_id: String,
    source: Box<dyn FrameSource>,
    tracker: Box<dyn PersonTracker>,
    info: Option<SourceInfo>,
    zones: Vec<ZoneCounter>,
    zone_repository: ZoneRepository,
    health: CameraHealth,
    live_count: usize,
    heatmap: HeatmapGrid,
    fps: f32,
    last_frame_at: Option<Instant>,
}

impl CameraPipeline {
    /// Build camera `index`; zones are loaded from `zone_repository`
    pub fn new(
        index: usize,
        source: Box<dyn FrameSource>,
        tracker: Box<dyn PersonTracker>,
        zone_repository: ZoneRepository,
        settings: &PipelineSettings,
    ) -> Self {
        let camera_id = index.to_string();
        let definitions = match zone_repository.load() {
            Ok(defs) => defs,
            Err(e) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    path = %zone_repository.path().display(),
                    error = %e,
                    "Failed to load zones, starting with none"
                );
                Vec::new()
            }
        };

        let mut pipeline = Self {
            index,
            camera_id,
            source,
            tracker,
            info: None,
            zones: Vec::new(),
            zone_repository,
            health: CameraHealth::default(),
            live_count: 0,
            heatmap: HeatmapGrid::new(settings.frame_width, settings.frame_height),
            fps: 0.0,
            last_frame_at: None,
        };
        pipeline.replace_zones(definitions, settings);
        pipeline
    }

    /// Snapshot key ("0", "1", ...)
    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Command / display label ("C1", "C2", ...)
    pub fn label(&self) -> String {
        format!("C{}", self.index + 1)
    }

    pub fn matches_target(&self, target: &str) -> bool {
        let target = target.trim();
        target == self.camera_id || target.eq_ignore_ascii_case(&self.label())
    }

    pub fn is_open(&self) -> bool {
        self.health.is_open()
    }

    pub fn health(&self) -> &CameraHealth {
        &self.health
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn fps(&self) -> f32 {
        match &self.info {
            Some(info) if self.fps <= 0.0 => info.fps,
            _ => self.fps,
        }
    }

    pub fn heatmap(&self) -> &HeatmapGrid {
        &self.heatmap
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    pub fn zones(&self) -> &[ZoneCounter] {
        &self.zones
    }

    pub fn zone_definitions(&self) -> Vec<ZoneDefinition> {
        self.zones.iter().map(|z| z.definition().clone()).collect()
    }

    /// Zone read models, names prefixed with the camera label
    pub fn zone_statuses(&self) -> Vec<ZoneStatus> {
        let label = self.label();
        self.zones
            .iter()
            .map(|z| z.status(format!("{}: {}", label, z.id())))
            .collect()
    }

    /// Open (or reopen) the feed
    pub fn open(&mut self) {
        self.health.reset();
        match self.source.open() {
            Ok(info) => {
                tracing::info!(
                    camera_id = %self.camera_id,
                    source = %self.source.describe(),
                    width = info.width,
                    height = info.height,
                    fps = info.fps,
                    "Camera opened"
                );
                self.info = Some(info);
            }
            Err(e) => {
                tracing::error!(
                    camera_id = %self.camera_id,
                    source = %self.source.describe(),
                    error = %e,
                    "Failed to open camera"
                );
                self.health.close(&self.camera_id);
            }
        }
    }

    pub fn release(&mut self) {
        self.source.release();
        self.info = None;
        self.last_frame_at = None;
        self.live_count = 0;
    }

    /// Replace the zone set. Zones whose id survives keep their counts.
    pub fn replace_zones(&mut self, definitions: Vec<ZoneDefinition>, settings: &PipelineSettings) {
        let mut previous: Vec<ZoneCounter> = std::mem::take(&mut self.zones);
        for definition in definitions {
            let definition = definition.normalized();
            let counter = match previous.iter().position(|z| z.id() == definition.id) {
                Some(pos) => {
                    let mut counter = previous.swap_remove(pos);
                    counter.redefine(definition);
                    counter
                }
                None => ZoneCounter::new(definition, settings.hysteresis_frames, settings.alert_cooldown),
            };
            self.zones.push(counter);
        }
    }

    pub fn clear_zones(&mut self) {
        self.zones.clear();
    }

    /// Write the current zone definitions to disk
    pub fn persist_zones(&self) -> Result<()> {
        self.zone_repository.save(&self.zone_definitions())
    }

    /// Process the next frame. `None` when the feed is closed; a closed
    /// camera holds no occupancy.
    pub fn process(
        &mut self,
        gallery: &mut IdentityGallery,
        settings: &PipelineSettings,
        now: DateTime<Utc>,
    ) -> Result<Option<CameraCycle>> {
        if !self.is_open() {
            self.clear_occupancy(gallery, now);
            return Ok(None);
        }

        let Some((frame, delivered)) = self.next_frame(settings) else {
            self.clear_occupancy(gallery, now);
            return Ok(None);
        };
        if let Some(FeedEvent::Recovered) = self.health.record(&self.camera_id, delivered) {
            self.last_frame_at = None;
        }
        if delivered {
            self.update_fps();
        }

        let frame = fit_frame(frame, settings.frame_width, settings.frame_height);
        let tracks = self.tracker.update(&frame)?;

        let label = self.label();
        let mut overlays = Vec::with_capacity(tracks.len());
        let mut present = BTreeSet::new();
        for track in tracks.iter().filter(|t| t.is_countable(settings.max_staleness)) {
            let key = TrackKey::new(self.camera_id.clone(), track.local_track_id);
            let person = crop(&frame, &track.bbox);
            let global_id = gallery.resolve_at(&key, person.as_ref(), now);
            let centroid = track.bbox.centroid();

            let mut holding_zone = None;
            for zone in &mut self.zones {
                zone.observe(global_id, centroid);
                if zone.contains(centroid) {
                    holding_zone = Some(format!("{}: {}", label, zone.id()));
                }
            }
            if is_confirmed(global_id) {
                present.insert(global_id);
            }
            overlays.push(TrackOverlay {
                bbox: track.bbox,
                centroid,
                global_id,
                zone: holding_zone,
            });
        }

        let centroids: Vec<(i32, i32)> = overlays.iter().map(|o| o.centroid).collect();
        self.heatmap.accumulate(&centroids);

        let reported: BTreeSet<u64> = tracks.iter().map(|t| t.local_track_id).collect();
        for key in gallery.tracked_keys(&self.camera_id) {
            if !reported.contains(&key.local_track_id) {
                gallery.release_track(&key, now);
            }
        }

        self.live_count = tracks
            .iter()
            .filter(|t| t.is_live(settings.live_staleness))
            .count();

        Ok(Some(CameraCycle {
            delivered,
            frame,
            overlays,
            present,
        }))
    }

    /// Zero live occupancy, empty every zone's live set and release this
    /// camera's track bindings
    fn clear_occupancy(&mut self, gallery: &mut IdentityGallery, now: DateTime<Utc>) {
        self.live_count = 0;
        self.evict_absent(&BTreeSet::new());
        for key in gallery.tracked_keys(&self.camera_id) {
            gallery.release_track(&key, now);
        }
    }

    /// Drop identities no longer present from every zone's live set
    pub fn evict_absent(&mut self, present: &BTreeSet<GlobalId>) {
        for zone in &mut self.zones {
            for global_id in zone.retain_present(present) {
                tracing::debug!(
                    camera_id = %self.camera_id,
                    zone_id = %zone.id(),
                    global_id = global_id,
                    "Evicted vanished identity from zone"
                );
            }
        }
    }

    /// Threshold alerts for this camera's zones
    pub fn check_alerts(&mut self, now: DateTime<Utc>) -> Vec<ZoneAlert> {
        self.zones
            .iter_mut()
            .filter_map(|zone| zone.check_alert(now))
            .collect()
    }

    /// Next frame and whether it came from the feed (false = blank substitute)
    fn next_frame(&mut self, settings: &PipelineSettings) -> Option<(RgbImage, bool)> {
        let attempts = settings.read_retries.max(1);
        for attempt in 1..=attempts {
            match self.source.read() {
                Ok(frame) => return Some((frame, true)),
                Err(SourceError::Transient(reason)) => {
                    tracing::debug!(
                        camera_id = %self.camera_id,
                        attempt = attempt,
                        reason = %reason,
                        "Transient read failure"
                    );
                    if attempt < attempts {
                        std::thread::sleep(settings.read_retry_delay);
                    }
                }
                Err(SourceError::Exhausted) => {
                    if self.source.rewind() {
                        tracing::debug!(camera_id = %self.camera_id, "Source exhausted, rewound");
                        if let Ok(frame) = self.source.read() {
                            return Some((frame, true));
                        }
                    }
                    break;
                }
                Err(SourceError::Closed(reason)) => {
                    tracing::error!(
                        camera_id = %self.camera_id,
                        reason = %reason,
                        "Camera source closed"
                    );
                    self.health.close(&self.camera_id);
                    return None;
                }
            }
        }

        Some((RgbImage::new(settings.frame_width, settings.frame_height), false))
    }

    fn update_fps(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_frame_at {
            let dt = now.duration_since(last).as_secs_f32();
            if dt > 0.0 {
                let instant = 1.0 / dt;
                self.fps = if self.fps <= 0.0 {
                    instant
                } else {
                    self.fps * 0.9 + instant * 0.1
                };
            }
        }
        self.last_frame_at = Some(now);
    }
}

/// Resize to the processing resolution when needed
fn fit_frame(frame: RgbImage, width: u32, height: u32) -> RgbImage {
    if frame.width() == width && frame.height() == height {
        frame
    } else {
        image::imageops::resize(&frame, width, height, FilterType::Triangle)
    }
}
