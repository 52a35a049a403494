//! Error types for Argon

use thiserror::Error;

/// Result type alias using ArgonError
pub type Result<T> = std::result::Result<T, ArgonError>;

/// Main error type for Argon operations
#[derive(Debug, Error)]
pub enum ArgonError {
    /// Invalid settings, unknown device, unsupported option combination
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend or device could not be brought up
    #[error("Initialization error: {0}")]
    Init(String),

    /// Capture source error
    #[error("Source error: {0}")]
    Source(String),

    /// Scene or compositor error
    #[error("Render error: {0}")]
    Render(String),

    /// Encoder error
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Transmission error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Unsupported operation
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArgonError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an initialization error
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(msg.into())
    }

    /// Create a source error
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Create a render error
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Create an encoder error
    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder(msg.into())
    }

    /// Create a stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Create an unsupported-operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Check if this error leaves the stage safely stopped
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Unsupported(_))
    }
}

impl From<ffmpeg_next::Error> for ArgonError {
    fn from(err: ffmpeg_next::Error) -> Self {
        Self::Encoder(err.to_string())
    }
}
