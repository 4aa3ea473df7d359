//! Live frame capture
//!
//! This module provides the camera's live image as a frame source and the
//! loop that samples it into a recording.

pub mod capture_loop;
pub mod mjpeg;
pub mod source;
pub mod traits;

pub use capture_loop::{CaptureLoop, CaptureStats, RasterBuffer};
pub use source::{wait_for_load, LiveFrameSource};
pub use traits::{CaptureError, FrameEvent, FrameSource, Raster, Resolution, StreamControl};
