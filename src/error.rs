//! # Error Types
//!
//! Custom error types for Groundlink using `thiserror`.

use thiserror::Error;

/// Main error type for Groundlink
#[derive(Debug, Error)]
pub enum GroundlinkError {
    /// Serial port could not be opened or read
    #[error("Serial error: {0}")]
    Serial(String),

    /// Telemetry log misuse (e.g. writing after close)
    #[error("Telemetry log error: {0}")]
    Logger(String),

    /// Subscriber transport failure
    #[error("Subscriber error: {0}")]
    Subscriber(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Envelope serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket protocol errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Groundlink
pub type Result<T> = std::result::Result<T, GroundlinkError>;
