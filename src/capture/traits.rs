//! Frame source trait definitions
//!
//! Transport-agnostic types shared by the live frame source, the capture
//! loop and the stream watchdog.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

/// Raster dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Used when a recording starts before the stream reported its geometry
    pub const FALLBACK: Resolution = Resolution::new(640, 480);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Size in bytes of one RGBA frame at this resolution
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A decoded RGBA frame.
///
/// Cloning is cheap: the pixel buffer is shared.
#[derive(Debug, Clone)]
pub struct Raster {
    image: Arc<RgbaImage>,
}

impl Raster {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.image.width(), self.image.height())
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Raw RGBA bytes, row-major
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }
}

/// Events emitted by a frame source
#[derive(Debug, Clone)]
pub enum FrameEvent {
    /// A new request to the live endpoint was issued
    Connecting,
    /// A frame was decoded and is now the current raster
    Loaded { at: Instant },
    /// The request failed, stalled or ended
    Error { reason: String },
    /// The user paused the stream; the source no longer targets the live endpoint
    Paused,
}

/// Read side of a continuously-updating live image.
pub trait FrameSource: Send + Sync {
    /// The most recently decoded raster, or `None` if nothing is ready.
    /// Never blocks.
    fn current_frame(&self) -> Option<Raster>;

    /// Time of the last successful load
    fn last_load(&self) -> Option<Instant>;

    /// Geometry of the current raster, if any
    fn geometry(&self) -> Option<Resolution> {
        self.current_frame().map(|raster| raster.resolution())
    }
}

/// Request side of the live image, driven by the stream watchdog.
pub trait StreamControl: Send + Sync {
    /// Whether the source address still points at the live endpoint
    /// (false once the user paused the stream)
    fn targets_live(&self) -> bool;

    /// Issue a fresh request to the live endpoint
    fn reissue(&self);
}

/// Frame source errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stream endpoint returned status {0}")]
    Status(u16),

    #[error("No data received for {0}ms")]
    Stalled(u64),

    #[error("Stream ended")]
    EndOfStream,

    #[error("Failed to decode frame: {0}")]
    Decode(String),

    #[error("Frame of {0} bytes exceeds the size limit")]
    FrameTooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_helpers() {
        assert_eq!(Resolution::FALLBACK.to_string(), "640x480");
        assert_eq!(Resolution::new(2, 3).rgba_len(), 24);
        assert!(Resolution::new(0, 480).is_empty());
        assert!(!Resolution::FALLBACK.is_empty());
    }

    #[test]
    fn test_raster_reports_geometry() {
        let raster = Raster::new(RgbaImage::new(320, 240));
        assert_eq!(raster.resolution(), Resolution::new(320, 240));
        assert_eq!(raster.as_bytes().len(), 320 * 240 * 4);
    }
}
