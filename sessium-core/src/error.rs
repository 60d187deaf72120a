//! Error types for sessium-core

use thiserror::Error;

/// Main error type for the sessium-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable store error
    #[error("store error: {0}")]
    Store(String),

    /// SQLite error from the origin-durable store
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Delivery/collector error
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Acceleration bridge error
    #[error("acceleration error: {0}")]
    Acceleration(String),

    /// Capture-path error for a single signal
    #[error("capture error for {signal}: {message}")]
    Capture { signal: String, message: String },

    /// Lifecycle transition error
    #[error("invalid lifecycle transition: {0}")]
    Lifecycle(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sessium-core
pub type Result<T> = std::result::Result<T, Error>;
