//! Application state
//!
//! Holds configuration and the shared components handed to the
//! detection worker and to external readers

use crate::detection_service::DetectionService;
use crate::shared_state::SharedStateManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Camera feeds, in camera index order
    pub camera_sources: Vec<String>,
    /// Directory for the gallery file and the alert / occupancy logs
    pub data_dir: PathBuf,
    /// Directory for per-camera zone files
    pub zones_dir: PathBuf,
    /// Alert / occupancy persistence tick
    pub persist_interval: Duration,
    /// Snapshot status log tick
    pub status_log_interval: Duration,
    /// Pipeline tunables
    pub pipeline: PipelineSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        let camera_sources = std::env::var("CAMERA_SOURCES")
            .unwrap_or_else(|_| "data/replay/cam0.jsonl".to_string())
            .split(',')
            .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            camera_sources,
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            zones_dir: std::env::var("ZONES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("zones")),
            persist_interval: Duration::from_secs(env_parse("PERSIST_INTERVAL_SECS", 60)),
            status_log_interval: Duration::from_secs(env_parse("STATUS_LOG_INTERVAL_SECS", 10)),
            pipeline: PipelineSettings::from_env(),
        }
    }
}

impl AppConfig {
    /// Durable identity gallery
    pub fn gallery_path(&self) -> PathBuf {
        self.data_dir.join("reid_gallery.json")
    }

    /// Zone file for camera index `index`
    pub fn zone_path(&self, index: usize) -> PathBuf {
        self.zones_dir.join(format!("zones_source_{}.json", index))
    }

    /// Alert records (JSON lines)
    pub fn alert_log_path(&self) -> PathBuf {
        self.data_dir.join("alerts.jsonl")
    }

    /// Occupancy samples (JSON lines)
    pub fn occupancy_log_path(&self) -> PathBuf {
        self.data_dir.join("occupancy.jsonl")
    }
}

/// Tunables for identity matching, counting and loop pacing
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Minimum cosine similarity for a gallery match
    pub similarity_threshold: f32,
    /// Embeddings kept per identity (ring buffer)
    pub gallery_size: usize,
    /// Observations buffered before a new identity is allocated
    pub confirm_frames: usize,
    /// Idle time after which an identity is pruned
    pub memory_horizon: Duration,
    /// Outside frames a counted identity may accrue before it can be recounted
    pub hysteresis_frames: u32,
    /// Minimum time between two alerts for the same zone
    pub alert_cooldown: Duration,
    /// Tracks older than this (frames since update) are ignored
    pub max_staleness: u32,
    /// Tracks older than this do not count toward live occupancy
    pub live_staleness: u32,
    /// Minimum time between two snapshot publishes
    pub snapshot_interval: Duration,
    /// Minimum time between two rendered-frame publishes
    pub frame_publish_interval: Duration,
    /// Read attempts before a camera read is given up for this cycle
    pub read_retries: u32,
    pub read_retry_delay: Duration,
    /// Processing resolution (frames are resized to it)
    pub frame_width: u32,
    pub frame_height: u32,
    /// Bounded occupancy history
    pub history_capacity: usize,
    /// Pause after a cycle that processed frames
    pub busy_yield: Duration,
    /// Pause after a cycle with nothing to do
    pub idle_backoff: Duration,
    /// Pause after a failed cycle
    pub error_backoff: Duration,
    /// How often idle identities are pruned
    pub prune_interval: Duration,
    /// JPEG quality of published frames
    pub jpeg_quality: u8,
    /// Blend the decaying occupancy heatmap into published frames
    pub heatmap_overlay: bool,
    /// TrueType font for overlay labels; labels are skipped when unreadable
    pub overlay_font: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.65,
            gallery_size: 5,
            confirm_frames: 1,
            memory_horizon: Duration::from_secs(63_072_000), // 2 years
            hysteresis_frames: 30,
            alert_cooldown: Duration::from_secs(60),
            max_staleness: 5,
            live_staleness: 1,
            snapshot_interval: Duration::from_millis(500),
            frame_publish_interval: Duration::from_millis(50),
            read_retries: 20,
            read_retry_delay: Duration::from_millis(100),
            frame_width: 640,
            frame_height: 360,
            history_capacity: 100,
            busy_yield: Duration::from_millis(1),
            idle_backoff: Duration::from_millis(10),
            error_backoff: Duration::from_secs(1),
            prune_interval: Duration::from_secs(60),
            jpeg_quality: 80,
            heatmap_overlay: false,
            overlay_font: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
        }
    }
}

impl PipelineSettings {
    /// Defaults with environment overrides
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            similarity_threshold: env_parse(
                "REID_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            ),
            confirm_frames: env_parse("REID_CONFIRM_FRAMES", defaults.confirm_frames).max(1),
            hysteresis_frames: env_parse("HYSTERESIS_FRAMES", defaults.hysteresis_frames),
            alert_cooldown: Duration::from_secs(env_parse(
                "ALERT_COOLDOWN_SECS",
                defaults.alert_cooldown.as_secs(),
            )),
            heatmap_overlay: env_parse("HEATMAP_OVERLAY", defaults.heatmap_overlay),
            overlay_font: std::env::var("OVERLAY_FONT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| defaults.overlay_font.clone()),
            ..defaults
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key = %key, value = %raw, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Application state shared across tasks
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Live snapshot, frame buffer, queues, stop flag
    pub shared: Arc<SharedStateManager>,
    /// Detection worker lifecycle
    pub detection: Arc<DetectionService>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.similarity_threshold, 0.65);
        assert_eq!(settings.gallery_size, 5);
        assert_eq!(settings.confirm_frames, 1);
        assert_eq!(settings.hysteresis_frames, 30);
        assert_eq!(settings.alert_cooldown, Duration::from_secs(60));
        assert_eq!(settings.max_staleness, 5);
        assert_eq!(settings.history_capacity, 100);
        assert!(!settings.heatmap_overlay);
    }

    #[test]
    fn test_config_paths() {
        let config = AppConfig {
            camera_sources: vec!["a.jsonl".to_string()],
            data_dir: PathBuf::from("/tmp/occ"),
            zones_dir: PathBuf::from("/tmp/occ/zones"),
            persist_interval: Duration::from_secs(60),
            status_log_interval: Duration::from_secs(10),
            pipeline: PipelineSettings::default(),
        };
        assert_eq!(config.gallery_path(), PathBuf::from("/tmp/occ/reid_gallery.json"));
        assert_eq!(config.zone_path(1), PathBuf::from("/tmp/occ/zones/zones_source_1.json"));
    }
}
