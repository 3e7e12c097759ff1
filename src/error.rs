//! Error types for Synheart Breath

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while running or analyzing a breathing session
#[derive(Debug, Error)]
pub enum BreathError {
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Session data could not be persisted: {0}")]
    PersistenceFailed(String),

    #[error("No session found in {}", .0.display())]
    NoSessionFound(PathBuf),

    #[error("Failed to parse session data: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}
