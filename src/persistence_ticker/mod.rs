//! PersistenceTicker - Durable alert and occupancy logs
//!
//! ## Responsibilities
//!
//! - Periodically drain the alert queue into a JSON-lines alert log
//! - Append one global occupancy sample per tick
//! - Keep alerts queued when the write fails (retried next tick)
//! - Final drain on shutdown
//!
//! Runs as a tokio task; it only talks to the detection worker through
//! the shared state hub.

use crate::error::Result;
use crate::shared_state::{AlertRecord, SharedStateManager};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Zone name used for whole-site occupancy samples
pub const GLOBAL_OCCUPANCY: &str = "_GLOBAL_OCCUPANCY_";

/// Occupancy sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyRecord {
    pub zone_name: String,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Append-only JSON-lines file
#[derive(Debug, Clone)]
pub struct JsonLinesLog {
    path: PathBuf,
}

impl JsonLinesLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records, one JSON object per line
    pub async fn append<T: Serialize>(&self, records: &[T]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }
}

/// What one tick wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub alerts: usize,
    pub occupancy: usize,
}

/// PersistenceTicker instance
pub struct PersistenceTicker {
    shared: Arc<SharedStateManager>,
    alert_log: JsonLinesLog,
    occupancy_log: JsonLinesLog,
    interval: Duration,
}

impl PersistenceTicker {
    pub fn new(
        shared: Arc<SharedStateManager>,
        alert_log: JsonLinesLog,
        occupancy_log: JsonLinesLog,
        interval: Duration,
    ) -> Self {
        Self {
            shared,
            alert_log,
            occupancy_log,
            interval,
        }
    }

    /// Drain pending alerts and record the current occupancy
    pub async fn persist_once(&self) -> Result<PersistReport> {
        let mut report = PersistReport::default();

        let snapshot = self.shared.snapshot();
        let sample = OccupancyRecord {
            zone_name: GLOBAL_OCCUPANCY.to_string(),
            count: snapshot.people_count,
            timestamp: Utc::now(),
        };
        self.occupancy_log.append(&[sample]).await?;
        report.occupancy = 1;

        let alerts: Vec<AlertRecord> = self.shared.drain_alerts();
        if let Err(e) = self.alert_log.append(&alerts).await {
            self.shared.requeue_alerts(alerts);
            return Err(e);
        }
        report.alerts = alerts.len();

        if report.alerts > 0 {
            tracing::info!(
                alerts = report.alerts,
                path = %self.alert_log.path().display(),
                "Alerts persisted"
            );
        }
        Ok(report)
    }

    /// Tick until `shutdown` flips to true, then persist one last time
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
            ticker.tick().await;
            tracing::info!(interval_secs = self.interval.as_secs(), "Persistence ticker started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.persist_once().await {
                            tracing::error!(error = %e, "Persistence tick failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            if let Err(e) = self.persist_once().await {
                tracing::error!(error = %e, "Final persistence failed");
            }
            tracing::info!("Persistence ticker stopped");
        })
    }
}
