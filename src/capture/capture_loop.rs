//! Capture loop
//!
//! Samples the frame source into an off-screen raster buffer at a fixed rate
//! and feeds the buffer to the active encoder. The loop has no hard cancel:
//! it checks the shared recording flag at the top of every tick and exits
//! once the flag is cleared.

use super::traits::{FrameSource, Raster, Resolution};
use crate::encoder::EncoderSlot;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Off-screen raster the capture loop draws into
#[derive(Debug)]
pub struct RasterBuffer {
    resolution: Resolution,
    image: RgbaImage,
    drawn: bool,
}

impl RasterBuffer {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            image: RgbaImage::new(resolution.width, resolution.height),
            drawn: false,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Copy-scale a frame into the buffer at the buffer's fixed dimensions
    pub fn draw(&mut self, raster: &Raster) {
        if raster.resolution() == self.resolution {
            self.image.copy_from_slice(raster.as_bytes());
        } else {
            self.image = imageops::resize(
                raster.image(),
                self.resolution.width,
                self.resolution.height,
                FilterType::Triangle,
            );
        }
        self.drawn = true;
    }

    /// True once at least one frame has been drawn
    pub fn has_content(&self) -> bool {
        self.drawn
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }
}

/// Counters reported when the loop exits
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub ticks: u64,
    pub frames_drawn: u64,
    pub ticks_skipped: u64,
    pub frames_pushed: u64,
}

/// Self-rescheduling sampler bound to one recording session
pub struct CaptureLoop {
    source: Arc<dyn FrameSource>,
    recording: Arc<AtomicBool>,
    encoder: EncoderSlot,
    buffer: RasterBuffer,
    period: Duration,
}

impl CaptureLoop {
    pub fn new(
        source: Arc<dyn FrameSource>,
        recording: Arc<AtomicBool>,
        encoder: EncoderSlot,
        resolution: Resolution,
        fps: u32,
    ) -> Self {
        Self {
            source,
            recording,
            encoder,
            buffer: RasterBuffer::new(resolution),
            period: Duration::from_secs_f64(1.0 / f64::from(fps.max(1))),
        }
    }

    /// Spawn the loop onto the runtime
    pub fn start(self) -> JoinHandle<CaptureStats> {
        tracing::info!(
            "Capture loop started at {} every {:?}",
            self.buffer.resolution(),
            self.period
        );
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> CaptureStats {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats = CaptureStats::default();

        loop {
            ticker.tick().await;
            if !self.recording.load(Ordering::SeqCst) {
                break;
            }
            self.tick(&mut stats);
        }

        tracing::info!(
            "Capture loop stopped. Drew {} frames over {} ticks",
            stats.frames_drawn,
            stats.ticks
        );
        stats
    }

    fn tick(&mut self, stats: &mut CaptureStats) {
        stats.ticks += 1;

        match self.source.current_frame() {
            Some(raster) => {
                self.buffer.draw(&raster);
                stats.frames_drawn += 1;
            }
            None => stats.ticks_skipped += 1,
        }

        if !self.buffer.has_content() {
            return;
        }

        // The slot is emptied by the reaper; pushing then becomes a no-op
        if let Some(handle) = self.encoder.lock().as_mut() {
            match handle.push_frame(self.buffer.as_bytes()) {
                Ok(()) => stats.frames_pushed += 1,
                Err(err) => tracing::debug!("Frame not accepted by encoder: {}", err),
            }
        }
    }
}
