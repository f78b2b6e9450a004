//! DetectionService - Start / stop lifecycle of the detection worker
//!
//! ## Responsibilities
//!
//! - Spawn the orchestrator loop on a blocking thread
//! - Idempotent start / stop driven by the shared stop flag
//! - Keep the orchestrator (gallery, zones) across stop / start cycles
//!
//! The worker hands the orchestrator back through its join handle when the
//! loop exits, so a restart resumes with the same identities and counts.

use crate::error::{Error, Result};
use crate::multi_camera_orchestrator::{LoopExit, MultiCameraOrchestrator};
use crate::shared_state::SharedStateManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    /// Worker launched
    Started,
    /// A stopping worker was joined and relaunched with its state
    Resumed,
    /// Already running; nothing changed
    AlreadyRunning,
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Stop flag set; the loop exits at its next check
    Stopping,
    /// Not running; nothing changed
    NotRunning,
}

type Worker = JoinHandle<(MultiCameraOrchestrator, LoopExit)>;

#[derive(Default)]
struct WorkerSlot {
    idle: Option<MultiCameraOrchestrator>,
    running: Option<Worker>,
    last_exit: Option<LoopExit>,
}

/// DetectionService instance
pub struct DetectionService {
    shared: Arc<SharedStateManager>,
    slot: Mutex<WorkerSlot>,
}

impl DetectionService {
    /// Wrap an orchestrator. Nothing runs until `start`.
    pub fn new(shared: Arc<SharedStateManager>, orchestrator: MultiCameraOrchestrator) -> Self {
        Self {
            shared,
            slot: Mutex::new(WorkerSlot {
                idle: Some(orchestrator),
                ..Default::default()
            }),
        }
    }

    /// Running = stop flag cleared
    pub fn is_running(&self) -> bool {
        !self.shared.is_stopped()
    }

    /// Start (or resume) the detection loop
    pub async fn start(&self) -> Result<StartOutcome> {
        let mut slot = self.slot.lock().await;
        if self.is_running() {
            tracing::debug!("Detection already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let mut outcome = StartOutcome::Started;
        if let Some(worker) = slot.running.take() {
            if !worker.is_finished() {
                outcome = StartOutcome::Resumed;
            }
            Self::reclaim(&mut slot, worker).await?;
        }

        let mut orchestrator = slot
            .idle
            .take()
            .ok_or_else(|| Error::Internal("detection worker state lost".to_string()))?;

        self.shared.clear_stop();
        let shared = self.shared.clone();
        slot.running = Some(tokio::task::spawn_blocking(move || {
            let exit = orchestrator.run();
            // A loop that ends on its own (all sources lost) is stopped too
            shared.request_stop();
            (orchestrator, exit)
        }));

        tracing::info!(outcome = ?outcome, "Detection started");
        Ok(outcome)
    }

    /// Ask the loop to stop at its next iteration
    pub fn stop(&self) -> StopOutcome {
        if !self.is_running() {
            return StopOutcome::NotRunning;
        }
        self.shared.request_stop();
        tracing::info!("Detection stop requested");
        StopOutcome::Stopping
    }

    /// Stop and wait for the worker to finish its shutdown sequence
    pub async fn shutdown(&self) -> Result<Option<LoopExit>> {
        self.stop();
        let mut slot = self.slot.lock().await;
        if let Some(worker) = slot.running.take() {
            Self::reclaim(&mut slot, worker).await?;
        }
        Ok(slot.last_exit)
    }

    /// Inspect the orchestrator while the worker is not running
    pub async fn inspect<R>(&self, f: impl FnOnce(&MultiCameraOrchestrator) -> R) -> Option<R> {
        let slot = self.slot.lock().await;
        slot.idle.as_ref().map(f)
    }

    async fn reclaim(slot: &mut WorkerSlot, worker: Worker) -> Result<()> {
        let (orchestrator, exit) = worker
            .await
            .map_err(|e| Error::Internal(format!("detection worker failed: {}", e)))?;
        slot.idle = Some(orchestrator);
        slot.last_exit = Some(exit);
        Ok(())
    }
}
