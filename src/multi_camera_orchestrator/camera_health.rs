//! Camera feed health
//!
//! Tracks whether a feed delivers real frames and reports only the
//! transitions, so a flapping camera is logged once per change.

use serde::{Deserialize, Serialize};

/// Feed status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    /// Never read
    Unknown,
    /// Delivering frames
    Online,
    /// Falling back to blank frames
    Degraded,
    /// Handle closed; no further reads
    Closed,
}

/// Status transition worth reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    Lost,
    Recovered,
    Closed,
}

#[derive(Debug, Clone)]
pub struct CameraHealth {
    status: FeedStatus,
    consecutive_failures: u32,
}

impl Default for CameraHealth {
    fn default() -> Self {
        Self {
            status: FeedStatus::Unknown,
            consecutive_failures: 0,
        }
    }
}

impl CameraHealth {
    pub fn status(&self) -> FeedStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status != FeedStatus::Closed
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record the outcome of one read cycle
    pub fn record(&mut self, camera_id: &str, delivered: bool) -> Option<FeedEvent> {
        if self.status == FeedStatus::Closed {
            return None;
        }

        let prev = self.status;
        if delivered {
            self.consecutive_failures = 0;
            self.status = FeedStatus::Online;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.status = FeedStatus::Degraded;
        }

        match (prev, self.status) {
            (FeedStatus::Online | FeedStatus::Unknown, FeedStatus::Degraded) => {
                tracing::warn!(camera_id = %camera_id, "Camera feed lost, substituting blank frames");
                Some(FeedEvent::Lost)
            }
            (FeedStatus::Degraded, FeedStatus::Online) => {
                tracing::info!(camera_id = %camera_id, "Camera feed recovered");
                Some(FeedEvent::Recovered)
            }
            _ => None,
        }
    }

    pub fn close(&mut self, camera_id: &str) -> Option<FeedEvent> {
        if self.status == FeedStatus::Closed {
            return None;
        }
        self.status = FeedStatus::Closed;
        tracing::warn!(camera_id = %camera_id, "Camera feed closed");
        Some(FeedEvent::Closed)
    }

    /// Back to `Unknown` after the handle is reopened
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
