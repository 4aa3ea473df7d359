//! Error types and handling
//!
//! Common error types used across the application.

use crate::capture::CaptureError;
use crate::device::DeviceError;
use crate::recorder::RecordingError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Stream error: {0}")]
    Capture(#[from] CaptureError),
}

/// Error response for the UI
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Recording(RecordingError::EmptyOutput) => "EMPTY_RECORDING",
            AppError::Recording(_) => "RECORDING_ERROR",
            AppError::Device(_) => "DEVICE_ERROR",
            AppError::Capture(_) => "STREAM_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
