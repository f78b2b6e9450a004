//! Occupancy Engine Library
//!
//! Multi-camera people counting with cross-camera identities
//!
//! ## Architecture (8 Components)
//!
//! 1. Vision - Frame source / tracker / embedding boundary
//! 2. ReplayFeed - Recorded tracker output played back as a camera
//! 3. IdentityGallery - Durable global ids from appearance matching
//! 4. ZoneCounter - Per-zone occupancy with boundary hysteresis
//! 5. SharedStateManager - Snapshot, frames, command and alert queues
//! 6. MultiCameraOrchestrator - Detection loop across all cameras
//! 7. DetectionService - Worker start / stop lifecycle
//! 8. PersistenceTicker - Durable alert and occupancy logs
//!
//! ## Design Principles
//!
//! - The detection worker owns the gallery and the zone counters
//! - Everything else talks to it through the shared state hub
//! - One lock per hub, never held across I/O

pub mod detection_service;
pub mod error;
pub mod identity_gallery;
pub mod multi_camera_orchestrator;
pub mod persistence_ticker;
pub mod replay_feed;
pub mod shared_state;
pub mod state;
pub mod vision;
pub mod zone_counter;

pub use error::{Error, Result};
pub use state::AppState;
