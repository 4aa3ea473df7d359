//! In-crate fakes for the seams between components

mod device;
mod encoder;
mod frames;
mod sink;

pub use device::{serve_once, FakeDevice};
pub use encoder::{empty_slot, slot_with, FakeBackend, FakeHandle, FixedProbe};
pub use frames::{jpeg_bytes, solid_raster, FakeStream, StaticFrameSource};
pub use sink::MemorySink;
