//! Error handling for the occupancy engine

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error (gallery, zone and log files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Image buffer / encoder error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Detector / tracker failure
    #[error("Tracker error: {0}")]
    Tracker(String),

    /// Validation error (malformed zone definitions, commands)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
