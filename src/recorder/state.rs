//! Recording state management
//!
//! Defines the recording state machine's states, the local session it owns,
//! and the artifact a finished local recording produces.

use crate::capture::{CaptureStats, Resolution};
use crate::encoder::{ContainerFormat, EncoderError, EncoderSession};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Where a recording is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    /// Encoded on this machine from the live view
    #[default]
    Local,
    /// Recorded by the camera itself to its SD card
    Remote,
}

impl fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingMode::Local => f.write_str("local"),
            RecordingMode::Remote => f.write_str("remote"),
        }
    }
}

impl FromStr for RecordingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "device" => Ok(RecordingMode::Local),
            "remote" | "sd" => Ok(RecordingMode::Remote),
            other => Err(format!("unknown recording mode '{}'", other)),
        }
    }
}

/// Current state of the recording system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Currently recording
    Recording,
}

/// Public description of the active local session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub resolution: Resolution,
    pub container: ContainerFormat,
    pub started_at: DateTime<Utc>,
}

/// A local recording in progress.
///
/// Owns the encoder session (and through it the chunk sequence) and the
/// capture loop task.
pub struct RecordingSession {
    pub info: SessionInfo,
    pub(crate) encoder: EncoderSession,
    pub(crate) capture: JoinHandle<CaptureStats>,
}

impl RecordingSession {
    pub fn new(resolution: Resolution, encoder: EncoderSession, capture: JoinHandle<CaptureStats>) -> Self {
        Self {
            info: SessionInfo {
                id: Uuid::new_v4(),
                resolution,
                container: encoder.container(),
                started_at: Utc::now(),
            },
            encoder,
            capture,
        }
    }
}

/// A finished local recording, ready to be saved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingArtifact {
    pub container: ContainerFormat,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl RecordingArtifact {
    /// Concatenate chunks in order. Returns `None` when there is no data.
    pub fn from_chunks(container: ContainerFormat, chunks: Vec<Vec<u8>>) -> Option<Self> {
        let bytes = chunks.concat();
        if bytes.is_empty() {
            return None;
        }
        Some(Self {
            container,
            bytes,
            created_at: Utc::now(),
        })
    }

    pub fn mime_type(&self) -> &'static str {
        self.container.mime_type()
    }

    /// `rec_<epoch millis>.<ext>`
    pub fn file_name(&self) -> String {
        format!(
            "rec_{}.{}",
            self.created_at.timestamp_millis(),
            self.container.extension()
        )
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Events emitted by the recording state machine
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingEvent {
    Started { mode: RecordingMode },
    Stopped { mode: RecordingMode },
    Saved {
        path: PathBuf,
        container: ContainerFormat,
        bytes: usize,
    },
    /// Informational, user-facing message
    Notice(String),
    /// Non-blocking failure notification
    Error(String),
}

/// Recording errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Local recording failed: {0}")]
    EncoderFatal(#[from] EncoderError),

    #[error("Recording produced no data")]
    EmptyOutput,

    #[error("Recording mode cannot change while recording")]
    ModeLocked,

    #[error("Failed to save recording: {0}")]
    Delivery(#[from] std::io::Error),
}

pub type RecordingResult<T> = Result<T, RecordingError>;
