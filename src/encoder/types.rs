//! Encoder types and seams
//!
//! This module defines the container formats the recorder can produce, the
//! events an encoder emits, and the traits an encoder backend implements.

use crate::capture::Resolution;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Output container (and codec) of a local recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerFormat {
    /// H.264 in fragmented MP4
    Mp4,
    /// VP9 in WebM
    WebmVp9,
    /// WebM with whatever codec the encoder picks by default
    WebmDefault,
}

impl ContainerFormat {
    /// Media type the finished recording is tagged with
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "video/mp4",
            ContainerFormat::WebmVp9 => "video/webm;codecs=vp9",
            ContainerFormat::WebmDefault => "video/webm",
        }
    }

    /// File extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::WebmVp9 | ContainerFormat::WebmDefault => "webm",
        }
    }

    /// FFmpeg video codec, or `None` to let the muxer choose
    pub fn video_codec(&self) -> Option<&'static str> {
        match self {
            ContainerFormat::Mp4 => Some("libx264"),
            ContainerFormat::WebmVp9 => Some("libvpx-vp9"),
            ContainerFormat::WebmDefault => None,
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Encoder errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncoderError {
    #[error("Unsupported encoder configuration: {0}")]
    Unsupported(String),

    #[error("Failed to start encoder: {0}")]
    Spawn(String),

    #[error("Encoder IO error: {0}")]
    Io(String),

    #[error("Encoder process failed: {0}")]
    Process(String),

    #[error("Encoder did not finalize within {0}ms")]
    FinalizeTimeout(u64),

    #[error("Encoder is closed")]
    Closed,
}

/// Events delivered by an open encoder, in production order.
///
/// A stream of `Chunk`s is terminated by exactly one `Finalized` or `Fatal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    Chunk(Vec<u8>),
    Fatal(EncoderError),
    Finalized,
}

/// Parameters shared by every encoder construction attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderOptions {
    pub resolution: Resolution,
    pub fps: u32,
    /// How often buffered output is flushed as a chunk
    pub chunk_interval: Duration,
}

/// Control side of an open encoder
pub trait EncoderHandle: Send {
    /// Container this encoder is producing
    fn container(&self) -> ContainerFormat;

    /// Submit one RGBA frame at the configured resolution
    fn push_frame(&mut self, frame: &[u8]) -> Result<(), EncoderError>;

    /// End the input stream. The encoder flushes and then emits `Finalized`.
    fn close(&mut self);

    /// False once closed or once the encoder stopped on its own
    fn is_active(&self) -> bool;

    /// Release every resource the encoder holds
    fn release(&mut self);
}

/// A freshly constructed encoder and its event stream
pub struct OpenedEncoder {
    pub handle: Box<dyn EncoderHandle>,
    pub events: mpsc::UnboundedReceiver<EncoderEvent>,
}

/// Something that can construct encoders
pub trait EncoderBackend: Send + Sync {
    /// Construct an encoder. `None` means no explicit codec: accept whatever
    /// the backend produces by default.
    fn open(
        &self,
        format: Option<ContainerFormat>,
        options: &EncoderOptions,
    ) -> Result<OpenedEncoder, EncoderError>;
}

/// Static capability check used during negotiation
pub trait CapabilityProbe: Send + Sync {
    fn supports(&self, format: ContainerFormat) -> bool;
}

/// Shared slot holding the active encoder handle, if any
pub type EncoderSlot = Arc<Mutex<Option<Box<dyn EncoderHandle>>>>;
