//! MJPEG stream parsing
//!
//! The camera serves its live view as `multipart/x-mixed-replace`, one JPEG
//! per part:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: 12345\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```
//!
//! Parts are delimited by `Content-Length` when the header is present and by
//! the JPEG SOI/EOI markers otherwise.

use super::traits::{CaptureError, Raster};
use image::ImageFormat;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Upper bound on buffered bytes while looking for a part header
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Upper bound on a single part body
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Incremental parser that turns body chunks into complete JPEG payloads
#[derive(Debug, Default)]
pub struct MjpegParser {
    buf: Vec<u8>,
    body: Option<BodyFraming>,
}

#[derive(Debug, Clone, Copy)]
enum BodyFraming {
    Length(usize),
    Markers,
}

impl MjpegParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the response body, returning every JPEG completed by it.
    ///
    /// Fails when a part declares or grows past [`MAX_FRAME_BYTES`]; the
    /// stream cannot be resynchronised after that.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>, CaptureError> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            match self.body {
                None => {
                    if !self.read_header()? {
                        break;
                    }
                }
                Some(BodyFraming::Length(len)) => {
                    if self.buf.len() < len {
                        break;
                    }
                    let frame: Vec<u8> = self.buf.drain(..len).collect();
                    self.body = None;
                    if !frame.is_empty() {
                        frames.push(frame);
                    }
                }
                Some(BodyFraming::Markers) => match find(&self.buf[SOI.len().min(self.buf.len())..], &EOI) {
                    Some(pos) => {
                        let end = SOI.len() + pos + EOI.len();
                        frames.push(self.buf.drain(..end).collect());
                        self.body = None;
                    }
                    None if self.buf.len() > MAX_FRAME_BYTES => {
                        let buffered = self.buf.len();
                        self.reset();
                        return Err(CaptureError::FrameTooLarge(buffered));
                    }
                    None => break,
                },
            }
        }

        Ok(frames)
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.body = None;
    }

    /// Consume one part header. Returns false when more data is needed.
    fn read_header(&mut self) -> Result<bool, CaptureError> {
        if let Some(start) = find(&self.buf, &SOI) {
            // Body without a preceding header block
            if find(&self.buf[..start], HEADER_END).is_none() {
                self.buf.drain(..start);
                self.body = Some(BodyFraming::Markers);
                return Ok(true);
            }
        }

        let Some(end) = find(&self.buf, HEADER_END) else {
            if self.buf.len() > MAX_HEADER_BYTES {
                tracing::debug!("Discarding {} bytes of unframed stream data", self.buf.len());
                let keep = self.buf.len() - 1;
                self.buf.drain(..keep);
            }
            return Ok(false);
        };

        let header = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf.drain(..end + HEADER_END.len());

        self.body = Some(match content_length(&header) {
            Some(len) if len > MAX_FRAME_BYTES => {
                self.reset();
                return Err(CaptureError::FrameTooLarge(len));
            }
            Some(len) => BodyFraming::Length(len),
            None => BodyFraming::Markers,
        });
        Ok(true)
    }
}

fn content_length(header: &str) -> Option<usize> {
    header.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Decode a JPEG payload into an RGBA raster
pub fn decode_jpeg(bytes: &[u8]) -> Result<Raster, CaptureError> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(|e| CaptureError::Decode(e.to_string()))?;
    Ok(Raster::new(image.to_rgba8()))
}
