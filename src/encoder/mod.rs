//! Local recording encoder
//!
//! This module negotiates an output container, runs the encoder and
//! collects its output as an ordered sequence of chunks.

pub mod ffmpeg;
pub mod negotiate;
pub mod session;
pub mod types;

pub use ffmpeg::FfmpegBackend;
pub use negotiate::{negotiate, FfmpegProbe, PREFERENCE};
pub use session::{EncoderOutput, EncoderSession};
pub use types::{
    CapabilityProbe, ContainerFormat, EncoderBackend, EncoderError, EncoderEvent, EncoderHandle,
    EncoderOptions, EncoderSlot, OpenedEncoder,
};
