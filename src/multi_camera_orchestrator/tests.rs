use super::*;
use crate::identity_gallery::{GalleryRepository, GallerySettings, TrackKey};
use crate::replay_feed::fixtures::track;
use crate::replay_feed::{ColorHistogramExtractor, ReplayFrame, ReplaySource};
use crate::shared_state::ConfigCommand;
use crate::vision::{FrameSource, SourceError, SourceInfo};
use crate::zone_counter::{ZoneDefinition, ZoneRepository};
use image::RgbImage;
use std::path::Path;
use tempfile::tempdir;

const RED: [u8; 3] = [220, 20, 20];
const BLUE: [u8; 3] = [20, 20, 220];
const IN: [f32; 4] = [40.0, 40.0, 60.0, 60.0];
const OUT: [f32; 4] = [140.0, 140.0, 160.0, 160.0];

fn settings() -> PipelineSettings {
    PipelineSettings {
        snapshot_interval: Duration::ZERO,
        frame_publish_interval: Duration::ZERO,
        read_retries: 2,
        read_retry_delay: Duration::ZERO,
        frame_width: 200,
        frame_height: 200,
        busy_yield: Duration::ZERO,
        idle_backoff: Duration::ZERO,
        error_backoff: Duration::ZERO,
        ..PipelineSettings::default()
    }
}

fn zone_repo(dir: &Path, index: usize) -> ZoneRepository {
    ZoneRepository::new(dir.join(format!("zones_source_{}.json", index)))
}

fn camera(dir: &Path, index: usize, frames: Vec<ReplayFrame>, zones: Vec<ZoneDefinition>) -> CameraPipeline {
    let repo = zone_repo(dir, index);
    repo.save(&zones).unwrap();
    let source = ReplaySource::from_frames(format!("replay-{}", index), frames, 200, 200);
    let tracker = source.tracker();
    CameraPipeline::new(index, Box::new(source), Box::new(tracker), repo, &settings())
}

fn orchestrator(dir: &Path, cameras: Vec<CameraPipeline>) -> (MultiCameraOrchestrator, Arc<SharedStateManager>) {
    orchestrator_with(dir, cameras, settings())
}

fn orchestrator_with(
    dir: &Path,
    cameras: Vec<CameraPipeline>,
    settings: PipelineSettings,
) -> (MultiCameraOrchestrator, Arc<SharedStateManager>) {
    let gallery = IdentityGallery::with_repository(
        Box::new(ColorHistogramExtractor::new()),
        GallerySettings::default(),
        GalleryRepository::new(dir.join("reid_gallery.json")),
    );
    let shared = Arc::new(SharedStateManager::default());
    let mut orchestrator = MultiCameraOrchestrator::new(cameras, gallery, shared.clone(), settings);
    orchestrator.open_sources();
    (orchestrator, shared)
}

fn frames_of(bboxes: &[[f32; 4]], color: [u8; 3]) -> Vec<ReplayFrame> {
    bboxes
        .iter()
        .map(|b| ReplayFrame::with_tracks(vec![track(1, *b, color)]))
        .collect()
}

fn zone_a(threshold: u32) -> ZoneDefinition {
    ZoneDefinition::new("A", [0, 0, 100, 100], threshold)
}

/// Replay feed that reports `Closed` once `reads` frames are used up
struct ClosingSource {
    inner: ReplaySource,
    reads: usize,
}

impl FrameSource for ClosingSource {
    fn open(&mut self) -> std::result::Result<SourceInfo, SourceError> {
        self.inner.open()
    }

    fn read(&mut self) -> std::result::Result<RgbImage, SourceError> {
        if self.reads == 0 {
            return Err(SourceError::Closed("device unplugged".to_string()));
        }
        self.reads -= 1;
        self.inner.read()
    }

    fn rewind(&mut self) -> bool {
        self.inner.rewind()
    }

    fn release(&mut self) {
        self.inner.release()
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

#[test]
fn test_hysteresis_scenario_through_pipeline() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let mut path = vec![IN; 3];
    path.extend(vec![OUT; 40]);
    path.push(IN);
    let frames = frames_of(&path, RED);
    let cycles = frames.len();

    let (mut orch, shared) = orchestrator(&dir, vec![camera(&dir, 0, frames, vec![zone_a(10)])]);
    for _ in 0..cycles {
        assert_eq!(orch.run_cycle().unwrap(), CycleOutcome::Processed);
    }

    let zone = &orch.cameras()[0].zones()[0];
    assert_eq!(zone.total_count(), 2);
    assert_eq!(zone.active_ids().iter().copied().collect::<Vec<_>>(), vec![1]);

    let snap = shared.snapshot();
    assert_eq!(snap.zones["0"][0].name, "C1: A");
    assert_eq!(snap.zones["0"][0].total_count, 2);
    assert_eq!(snap.live_count, 1);
    assert_eq!(snap.total_visitors, 1);
    assert_eq!(snap.active_cameras, 1);
}

#[test]
fn test_vanished_track_evicted_immediately() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let frames = vec![
        ReplayFrame::with_tracks(vec![track(1, IN, RED)]),
        ReplayFrame::default(),
    ];
    let (mut orch, _shared) = orchestrator(&dir, vec![camera(&dir, 0, frames, vec![zone_a(10)])]);

    orch.run_cycle().unwrap();
    assert_eq!(orch.cameras()[0].zones()[0].count(), 1);

    orch.run_cycle().unwrap();
    assert_eq!(orch.cameras()[0].zones()[0].count(), 0);
    assert_eq!(orch.cameras()[0].zones()[0].total_count(), 1);
    assert_eq!(orch.gallery().binding(&TrackKey::new("0", 1)), None);
}

#[test]
fn test_same_appearance_across_cameras_shares_identity() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let cam0 = camera(&dir, 0, frames_of(&[IN], RED), vec![]);
    let cam1 = camera(
        &dir,
        1,
        vec![ReplayFrame::with_tracks(vec![
            track(5, OUT, RED),
            track(6, IN, BLUE),
        ])],
        vec![],
    );
    let (mut orch, shared) = orchestrator(&dir, vec![cam0, cam1]);
    orch.run_cycle().unwrap();

    let gallery = orch.gallery();
    assert_eq!(gallery.binding(&TrackKey::new("0", 1)), Some(1));
    assert_eq!(gallery.binding(&TrackKey::new("1", 5)), Some(1));
    assert_eq!(gallery.binding(&TrackKey::new("1", 6)), Some(2));
    assert_eq!(gallery.allocated_count(), 2);

    let snap = shared.snapshot();
    assert_eq!(snap.live_count, 3);
    assert_eq!(snap.total_visitors, 3);
    assert_eq!(snap.cameras["1"].resolution, "200x200");
}

#[test]
fn test_commands_applied_in_arrival_order() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let frames = vec![ReplayFrame::default(); 2];
    let (mut orch, shared) = orchestrator(&dir, vec![camera(&dir, 0, frames, vec![zone_a(10)])]);

    shared.queue_command(ConfigCommand::UpdateZones {
        target_camera: Some("C1".to_string()),
        zones: vec![ZoneDefinition::new("B", [0, 0, 50, 50], 4)],
    });
    shared.queue_command(ConfigCommand::ClearZones {
        target_camera: Some("0".to_string()),
    });
    orch.run_cycle().unwrap();

    assert!(orch.cameras()[0].zones().is_empty());
    assert!(zone_repo(&dir, 0).load().unwrap().is_empty());

    shared.queue_command(ConfigCommand::UpdateZones {
        target_camera: Some("C9".to_string()),
        zones: vec![ZoneDefinition::new("X", [0, 0, 1, 1], 1)],
    });
    shared.queue_command(ConfigCommand::UpdateZones {
        target_camera: None,
        zones: vec![ZoneDefinition::new("B", [0, 0, 50, 50], 4)],
    });
    orch.run_cycle().unwrap();

    let ids: Vec<String> = orch.cameras()[0]
        .zone_definitions()
        .into_iter()
        .map(|z| z.id)
        .collect();
    assert_eq!(ids, vec!["B".to_string()]);
    assert_eq!(zone_repo(&dir, 0).load().unwrap().len(), 1);
}

#[test]
fn test_alert_enqueued_over_threshold() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let (mut orch, shared) = orchestrator(
        &dir,
        vec![camera(&dir, 0, frames_of(&[IN, IN], RED), vec![zone_a(0)])],
    );
    orch.run_cycle().unwrap();
    orch.run_cycle().unwrap();

    let alerts = shared.drain_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].zone_name, "C1: A");
    assert_eq!(alerts[0].message, "Occupancy exceeded! (1/0)");
}

#[test]
fn test_frames_published_as_jpeg() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let (mut orch, shared) = orchestrator(
        &dir,
        vec![camera(&dir, 0, frames_of(&[IN], RED), vec![zone_a(10)])],
    );
    orch.run_cycle().unwrap();

    let frame = shared.latest_frame("0").expect("frame published");
    assert_eq!(&frame[..2], &[0xFF, 0xD8]);
}

#[test]
fn test_exhausted_replay_rewinds() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let (mut orch, _shared) = orchestrator(
        &dir,
        vec![camera(&dir, 0, frames_of(&[IN], RED), vec![zone_a(10)])],
    );
    for _ in 0..3 {
        assert_eq!(orch.run_cycle().unwrap(), CycleOutcome::Processed);
    }
    assert_eq!(orch.cameras()[0].zones()[0].total_count(), 1);
}

#[test]
fn test_dropped_frames_fall_back_to_blank() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let frames = vec![ReplayFrame::dropped(), ReplayFrame::dropped()];
    let (mut orch, _shared) = orchestrator(&dir, vec![camera(&dir, 0, frames, vec![])]);

    assert_eq!(orch.run_cycle().unwrap(), CycleOutcome::Idle);
    assert_eq!(orch.cameras()[0].health().status(), FeedStatus::Degraded);
}

#[test]
fn test_all_sources_lost() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let source = ReplaySource::from_path(dir.join("missing.jsonl"), 200, 200);
    let tracker = source.tracker();
    let cam = CameraPipeline::new(0, Box::new(source), Box::new(tracker), zone_repo(&dir, 0), &settings());
    let (mut orch, _shared) = orchestrator(&dir, vec![cam]);

    assert_eq!(orch.run_cycle().unwrap(), CycleOutcome::AllSourcesLost);
}

#[test]
fn test_run_exits_on_stop_and_persists() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let (mut orch, shared) = orchestrator(
        &dir,
        vec![camera(&dir, 0, frames_of(&[IN], RED), vec![zone_a(10)])],
    );
    orch.run_cycle().unwrap();

    shared.request_stop();
    assert_eq!(orch.run(), LoopExit::StopRequested);

    assert!(dir.join("reid_gallery.json").exists());
    assert_eq!(zone_repo(&dir, 0).load().unwrap(), vec![zone_a(10)]);
    let restored = GalleryRepository::new(dir.join("reid_gallery.json")).load().unwrap();
    assert_eq!(restored.entries.len(), 1);
}

#[test]
fn test_closed_camera_drops_its_occupancy() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let repo = zone_repo(dir, 0);
    repo.save(&[zone_a(10)]).unwrap();
    let inner = ReplaySource::from_frames("closing", frames_of(&[IN, IN, IN], RED), 200, 200);
    let tracker = inner.tracker();
    let closing = CameraPipeline::new(
        0,
        Box::new(ClosingSource { inner, reads: 2 }),
        Box::new(tracker),
        repo,
        &settings(),
    );
    let steady = camera(dir, 1, frames_of(&[IN, IN, IN], BLUE), vec![zone_a(10)]);
    let (mut orch, shared) = orchestrator(dir, vec![closing, steady]);

    orch.run_cycle().unwrap();
    orch.run_cycle().unwrap();
    assert_eq!(orch.cameras()[0].live_count(), 1);
    assert_eq!(orch.cameras()[0].zones()[0].count(), 1);
    assert_eq!(orch.gallery().binding(&TrackKey::new("0", 1)), Some(1));

    assert_eq!(orch.run_cycle().unwrap(), CycleOutcome::Processed);
    let closed = &orch.cameras()[0];
    assert!(!closed.is_open());
    assert_eq!(closed.live_count(), 0);
    assert_eq!(closed.zones()[0].count(), 0);
    assert_eq!(closed.zones()[0].total_count(), 1);
    assert_eq!(orch.gallery().binding(&TrackKey::new("0", 1)), None);
    assert_eq!(orch.gallery().binding(&TrackKey::new("1", 1)), Some(2));

    let snap = shared.snapshot();
    assert_eq!(snap.active_cameras, 1);
    assert_eq!(snap.live_count, 1);
    assert_eq!(snap.zones["0"][0].count, 0);
    assert_eq!(snap.zones["1"][0].count, 1);
}

#[test]
fn test_snapshot_throttled_independently_of_frames() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let throttled = PipelineSettings {
        snapshot_interval: Duration::from_secs(3600),
        ..settings()
    };
    let (mut orch, shared) = orchestrator_with(
        dir,
        vec![camera(dir, 0, frames_of(&[IN, IN], RED), vec![zone_a(10)])],
        throttled,
    );

    let first = Utc::now();
    orch.run_cycle_at(first).unwrap();
    assert_eq!(shared.snapshot().updated_at, Some(first));
    let published = shared.latest_frame("0").expect("first frame");

    orch.run_cycle_at(first + chrono::Duration::seconds(1)).unwrap();
    assert_eq!(shared.snapshot().updated_at, Some(first));
    let republished = shared.latest_frame("0").expect("second frame");
    assert!(!Arc::ptr_eq(&published, &republished));
}

#[test]
fn test_heatmap_overlay_only_when_enabled() {
    let publish = |heatmap_overlay: bool| {
        let tmp = tempdir().unwrap();
        let dir = tmp.path();
        let settings = PipelineSettings {
            heatmap_overlay,
            ..settings()
        };
        let (mut orch, shared) =
            orchestrator_with(dir, vec![camera(dir, 0, frames_of(&[IN], RED), vec![])], settings);
        orch.run_cycle().unwrap();
        assert!(orch.cameras()[0].heatmap().heat(50, 50) > 0.0);
        shared.latest_frame("0").expect("frame published")
    };

    let plain = publish(false);
    assert_eq!(plain, publish(false));
    assert_ne!(plain, publish(true));
}
