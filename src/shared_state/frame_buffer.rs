//! Per-camera latest-frame slots
//!
//! Each camera owns a `watch` channel holding the most recent encoded frame.
//! Publishing replaces the value and wakes every subscriber; a slow
//! subscriber sees only the newest frame (intermediate frames are dropped).

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Encoded (JPEG) frame shared between subscribers
pub type FrameBytes = Arc<Vec<u8>>;

/// Frame slots keyed by camera id. Not synchronised on its own; the hub
/// keeps it behind its lock.
#[derive(Default)]
pub struct FrameBuffer {
    slots: HashMap<String, watch::Sender<Option<FrameBytes>>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, camera_id: &str) -> &watch::Sender<Option<FrameBytes>> {
        self.slots
            .entry(camera_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
    }

    /// Store the latest frame and wake all waiters
    pub fn publish(&mut self, camera_id: &str, frame: FrameBytes) {
        self.slot(camera_id).send_replace(Some(frame));
    }

    /// Subscribe to future publishes; the current value counts as seen
    pub fn subscribe(&mut self, camera_id: &str) -> watch::Receiver<Option<FrameBytes>> {
        self.slot(camera_id).subscribe()
    }

    /// Latest frame without waiting
    pub fn latest(&self, camera_id: &str) -> Option<FrameBytes> {
        self.slots
            .get(camera_id)
            .and_then(|tx| tx.borrow().clone())
    }
}
