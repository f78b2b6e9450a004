//! SharedStateManager - Hub between the detection worker and its readers
//!
//! ## Responsibilities
//!
//! - Live snapshot (whitelisted partial merges, bounded history)
//! - Per-camera latest-frame broadcast
//! - Command queue (readers -> worker) and alert queue (worker -> persistence)
//! - Cooperative stop flag, the only source of truth for run state
//!
//! One mutex guards every multi-field structure. Lock sections never do I/O
//! and never await; `wait_for_frame` subscribes under the lock and waits
//! after releasing it.

mod frame_buffer;
mod types;

pub use frame_buffer::{FrameBuffer, FrameBytes};
pub use types::*;

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct Inner {
    snapshot: LiveSnapshot,
    frames: FrameBuffer,
    commands: VecDeque<ConfigCommand>,
    alerts: VecDeque<AlertRecord>,
}

/// SharedStateManager instance (one per process, shared through `Arc`)
pub struct SharedStateManager {
    inner: Mutex<Inner>,
    stop_requested: AtomicBool,
    history_capacity: usize,
}

impl SharedStateManager {
    /// Create a hub keeping at most `history_capacity` history points.
    /// Starts in the stopped state.
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                snapshot: LiveSnapshot::default(),
                frames: FrameBuffer::new(),
                commands: VecDeque::new(),
                alerts: VecDeque::new(),
            }),
            stop_requested: AtomicBool::new(true),
            history_capacity: history_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================
    // Snapshot
    // ========================================

    /// Merge a partial update into the live snapshot
    pub fn update(&self, update: SnapshotUpdate) {
        self.update_at(update, Utc::now());
    }

    /// Merge a partial update observed at `now`.
    ///
    /// A history point is appended when the update carries an occupancy
    /// field and no point exists yet for the same wall-clock second.
    pub fn update_at(&self, update: SnapshotUpdate, now: DateTime<Utc>) {
        let occupancy = update.occupancy();
        let mut inner = self.lock();
        let pending_alerts = inner.alerts.len();
        let snapshot = &mut inner.snapshot;

        if let Some(v) = update.live_count {
            snapshot.live_count = v;
        }
        if let Some(v) = update.people_count {
            snapshot.people_count = v;
        }
        if let Some(v) = update.total_visitors {
            snapshot.total_visitors = v;
        }
        if let Some(v) = update.zones {
            snapshot.zones = v;
        }
        if let Some(v) = update.cameras {
            snapshot.cameras = v;
        }
        if let Some(v) = update.active_cameras {
            snapshot.active_cameras = v;
        }
        snapshot.new_alerts = pending_alerts;
        snapshot.updated_at = Some(now);

        if let Some(count) = occupancy {
            let same_second = snapshot
                .history
                .back()
                .map(|p| p.timestamp.timestamp() == now.timestamp())
                .unwrap_or(false);
            if !same_second {
                if snapshot.history.len() >= self.history_capacity {
                    snapshot.history.pop_front();
                }
                snapshot.history.push_back(HistoryPoint {
                    timestamp: now,
                    count,
                });
            }
        }
    }

    /// Point-in-time copy of the live snapshot
    pub fn snapshot(&self) -> LiveSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn history(&self) -> Vec<HistoryPoint> {
        self.lock().snapshot.history.iter().cloned().collect()
    }

    // ========================================
    // Commands
    // ========================================

    pub fn queue_command(&self, command: ConfigCommand) {
        tracing::debug!(action = command.action(), "Command queued");
        self.lock().commands.push_back(command);
    }

    /// Parse and queue a JSON command. Malformed commands are rejected
    /// without touching the queue.
    pub fn queue_command_json(&self, value: serde_json::Value) -> crate::Result<()> {
        let command = ConfigCommand::from_json(value)?;
        self.queue_command(command);
        Ok(())
    }

    /// Take every queued command, oldest first
    pub fn drain_commands(&self) -> Vec<ConfigCommand> {
        self.lock().commands.drain(..).collect()
    }

    // ========================================
    // Frames
    // ========================================

    /// Store the latest encoded frame for a camera and wake its waiters
    pub fn publish_frame(&self, camera_id: &str, frame: Vec<u8>) {
        self.lock().frames.publish(camera_id, FrameBytes::new(frame));
    }

    /// Latest frame without waiting
    pub fn latest_frame(&self, camera_id: &str) -> Option<FrameBytes> {
        self.lock().frames.latest(camera_id)
    }

    /// Wait up to `timeout` for the next frame published for `camera_id`.
    ///
    /// Returns `None` when nothing was published within the timeout.
    pub async fn wait_for_frame(&self, camera_id: &str, timeout: Duration) -> Option<FrameBytes> {
        let mut rx = self.lock().frames.subscribe(camera_id);
        match tokio::time::timeout(timeout, rx.changed()).await {
            Ok(Ok(())) => rx.borrow_and_update().clone(),
            _ => None,
        }
    }

    // ========================================
    // Alerts
    // ========================================

    pub fn enqueue_alert(&self, alert: AlertRecord) {
        let mut inner = self.lock();
        inner.alerts.push_back(alert);
        inner.snapshot.alert_count += 1;
        inner.snapshot.new_alerts = inner.alerts.len();
    }

    /// Put back alerts whose persistence failed, ahead of newer ones.
    /// Not counted again in `alert_count`.
    pub fn requeue_alerts(&self, alerts: Vec<AlertRecord>) {
        let mut inner = self.lock();
        for alert in alerts.into_iter().rev() {
            inner.alerts.push_front(alert);
        }
        inner.snapshot.new_alerts = inner.alerts.len();
    }

    /// Take every pending alert, oldest first
    pub fn drain_alerts(&self) -> Vec<AlertRecord> {
        let mut inner = self.lock();
        let alerts: Vec<AlertRecord> = inner.alerts.drain(..).collect();
        inner.snapshot.new_alerts = 0;
        alerts
    }

    // ========================================
    // Run state
    // ========================================

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Clear the stop flag (resume). Returns whether it was set.
    pub fn clear_stop(&self) -> bool {
        self.stop_requested.swap(false, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

impl Default for SharedStateManager {
    fn default() -> Self {
        Self::new(100)
    }
}
