// ABOUTME: Error types for scripthost-telegram.
// ABOUTME: Defines BridgeError covering config, Telegram, download, and core failures.

use scripthost_core::{AdmissionError, RegistryError, SupervisorError};
use thiserror::Error;

/// Error types for the Telegram front end.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration loading or validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Telegram API error from teloxide.
    #[error("Telegram API error: {0}")]
    Telegram(String),

    /// Telegram request error from teloxide.
    #[error("Telegram request error: {0}")]
    TeloxideRequest(#[from] teloxide::RequestError),

    /// Downloading an uploaded document failed.
    #[error("Download error: {0}")]
    Download(#[from] teloxide::DownloadError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// IO error for file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
