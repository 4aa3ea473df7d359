use crate::capture::{FrameSource, Raster, StreamControl};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use parking_lot::RwLock;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::time::Instant;

/// Encode a gradient test image as JPEG
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    });
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut cursor, ImageFormat::Jpeg)
        .unwrap();
    cursor.into_inner()
}

pub fn solid_raster(width: u32, height: u32, rgba: [u8; 4]) -> Raster {
    Raster::new(RgbaImage::from_pixel(width, height, Rgba(rgba)))
}

/// Frame source that always returns the same raster (or none)
pub struct StaticFrameSource {
    frame: RwLock<Option<Raster>>,
}

impl StaticFrameSource {
    pub fn with_frame(raster: Raster) -> Self {
        Self {
            frame: RwLock::new(Some(raster)),
        }
    }

    pub fn empty() -> Self {
        Self {
            frame: RwLock::new(None),
        }
    }
}

impl FrameSource for StaticFrameSource {
    fn current_frame(&self) -> Option<Raster> {
        self.frame.read().clone()
    }

    fn last_load(&self) -> Option<Instant> {
        None
    }
}

/// Stream control that counts reissued requests
pub struct FakeStream {
    live: AtomicBool,
    reissues: AtomicUsize,
}

impl FakeStream {
    pub fn live() -> Self {
        Self {
            live: AtomicBool::new(true),
            reissues: AtomicUsize::new(0),
        }
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    pub fn reissues(&self) -> usize {
        self.reissues.load(Ordering::SeqCst)
    }
}

impl StreamControl for FakeStream {
    fn targets_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn reissue(&self) {
        self.reissues.fetch_add(1, Ordering::SeqCst);
    }
}
