//! Occupancy Engine - multi-camera people counting
//!
//! Main entry point: replays recorded camera feeds through the detection
//! loop and persists alerts / occupancy until interrupted.

use occupancy_engine::{
    detection_service::DetectionService,
    identity_gallery::{GalleryRepository, GallerySettings, IdentityGallery},
    multi_camera_orchestrator::{CameraPipeline, MultiCameraOrchestrator},
    persistence_ticker::{JsonLinesLog, PersistenceTicker},
    replay_feed::{ColorHistogramExtractor, ReplaySource},
    shared_state::SharedStateManager,
    state::{AppConfig, AppState},
    zone_counter::ZoneRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn build_cameras(config: &AppConfig) -> Vec<CameraPipeline> {
    let settings = &config.pipeline;
    config
        .camera_sources
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let feed = ReplaySource::from_path(source, settings.frame_width, settings.frame_height);
            let tracker = feed.tracker();
            let zones = ZoneRepository::new(config.zone_path(index));
            let camera = CameraPipeline::new(index, Box::new(feed), Box::new(tracker), zones, settings);
            tracing::info!(
                camera_id = %camera.camera_id(),
                label = %camera.label(),
                source = %camera.describe(),
                zones = camera.zones().len(),
                "Camera configured"
            );
            camera
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "occupancy_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Occupancy Engine v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    if config.camera_sources.is_empty() {
        anyhow::bail!("CAMERA_SOURCES is empty");
    }
    tracing::info!(
        cameras = config.camera_sources.len(),
        data_dir = %config.data_dir.display(),
        zones_dir = %config.zones_dir.display(),
        similarity_threshold = config.pipeline.similarity_threshold,
        hysteresis_frames = config.pipeline.hysteresis_frames,
        "Configuration loaded"
    );

    // Initialize components
    let cameras = build_cameras(&config);

    let gallery = IdentityGallery::with_repository(
        Box::new(ColorHistogramExtractor::new()),
        GallerySettings::from(&config.pipeline),
        GalleryRepository::new(config.gallery_path()),
    );
    tracing::info!(
        identities = gallery.identity_count(),
        allocated = gallery.allocated_count(),
        "IdentityGallery initialized"
    );

    let shared = Arc::new(SharedStateManager::new(config.pipeline.history_capacity));
    let orchestrator =
        MultiCameraOrchestrator::new(cameras, gallery, shared.clone(), config.pipeline.clone());
    let detection = Arc::new(DetectionService::new(shared.clone(), orchestrator));

    let state = AppState {
        config: config.clone(),
        shared: shared.clone(),
        detection: detection.clone(),
    };

    // Start detection loop
    let outcome = state.detection.start().await?;
    tracing::info!(outcome = ?outcome, "DetectionService started");

    // Alert / occupancy persistence
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticker = PersistenceTicker::new(
        state.shared.clone(),
        JsonLinesLog::new(config.alert_log_path()),
        JsonLinesLog::new(config.occupancy_log_path()),
        config.persist_interval,
    )
    .spawn(shutdown_rx);
    tracing::info!(
        interval_secs = config.persist_interval.as_secs(),
        alerts = %config.alert_log_path().display(),
        occupancy = %config.occupancy_log_path().display(),
        "PersistenceTicker started"
    );

    // Periodic status line
    let status_state = state.clone();
    let status_task = tokio::spawn(async move {
        let period = status_state.config.status_log_interval.max(Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let snap = status_state.shared.snapshot();
            tracing::info!(
                running = status_state.detection.is_running(),
                live = snap.live_count,
                total_visitors = snap.total_visitors,
                active_cameras = snap.active_cameras,
                alerts = snap.alert_count,
                "Status"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    status_task.abort();
    match state.detection.shutdown().await {
        Ok(exit) => tracing::info!(exit = ?exit, "DetectionService stopped"),
        Err(e) => tracing::error!(error = %e, "DetectionService shutdown failed"),
    }

    shutdown_tx.send(true).ok();
    if let Err(e) = ticker.await {
        tracing::error!(error = %e, "PersistenceTicker task failed");
    }

    tracing::info!("Occupancy Engine stopped");
    Ok(())
}
