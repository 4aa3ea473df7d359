//! Container negotiation
//!
//! Picks the first container in a fixed preference order that the local
//! encoder can produce. The probe is static: it inspects the installed
//! ffmpeg once and never touches the network.

use super::types::{CapabilityProbe, ContainerFormat};
use std::process::Command;

/// Formats tried in order before falling back to [`ContainerFormat::WebmDefault`]
pub const PREFERENCE: [ContainerFormat; 2] = [ContainerFormat::Mp4, ContainerFormat::WebmVp9];

/// Choose the preferred container supported by `probe`
pub fn negotiate(probe: &dyn CapabilityProbe) -> ContainerFormat {
    PREFERENCE
        .into_iter()
        .find(|format| probe.supports(*format))
        .unwrap_or(ContainerFormat::WebmDefault)
}

/// Capability probe backed by `ffmpeg -encoders`
#[derive(Debug, Clone, Default)]
pub struct FfmpegProbe {
    encoders: Vec<String>,
}

impl FfmpegProbe {
    /// Run the probe against the given ffmpeg binary.
    ///
    /// An ffmpeg that cannot be run reports no optional encoders, leaving only
    /// the default container.
    pub fn detect(ffmpeg_path: &str) -> Self {
        let output = match Command::new(ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .output()
        {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!("Could not probe {} for encoders: {}", ffmpeg_path, err);
                return Self::default();
            }
        };

        let probe = Self::from_listing(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!("Encoder probe found {} encoders", probe.encoders.len());
        probe
    }

    /// Parse the text printed by `ffmpeg -encoders`
    pub fn from_listing(listing: &str) -> Self {
        // Lines look like " V....D libx264   libx264 H.264 / AVC ..."
        let encoders = listing
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let flags = fields.next()?;
                let name = fields.next()?;
                let is_entry = flags.len() == 6 && !flags.starts_with('-') && name != "=";
                is_entry.then(|| name.to_string())
            })
            .collect();
        Self { encoders }
    }

    pub fn has_encoder(&self, name: &str) -> bool {
        self.encoders.iter().any(|encoder| encoder == name)
    }
}

impl CapabilityProbe for FfmpegProbe {
    fn supports(&self, format: ContainerFormat) -> bool {
        match format.video_codec() {
            Some(codec) => self.has_encoder(codec),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FixedProbe;

    const LISTING: &str = "Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D libvpx-vp9           libvpx VP9 (codec vp9)
 A....D aac                  AAC (Advanced Audio Coding)
";

    #[test]
    fn test_negotiation_order() {
        assert_eq!(
            negotiate(&FixedProbe::all()),
            ContainerFormat::Mp4
        );
        assert_eq!(
            negotiate(&FixedProbe::only(vec![ContainerFormat::WebmVp9])),
            ContainerFormat::WebmVp9
        );
        assert_eq!(negotiate(&FixedProbe::only(vec![])), ContainerFormat::WebmDefault);
    }

    #[test]
    fn test_listing_parse() {
        let probe = FfmpegProbe::from_listing(LISTING);
        assert!(probe.has_encoder("libx264"));
        assert!(probe.has_encoder("libvpx-vp9"));
        assert!(probe.has_encoder("aac"));
        // Legend lines are not encoders
        assert!(!probe.has_encoder("="));
        assert!(!probe.has_encoder("Video"));
        assert_eq!(negotiate(&probe), ContainerFormat::Mp4);
    }

    #[test]
    fn test_missing_ffmpeg_leaves_default_only() {
        let probe = FfmpegProbe::detect("/nonexistent/ffmpeg-binary");
        assert!(!probe.supports(ContainerFormat::Mp4));
        assert!(probe.supports(ContainerFormat::WebmDefault));
        assert_eq!(negotiate(&probe), ContainerFormat::WebmDefault);
    }
}
