//! Application configuration
//!
//! Loaded from an optional JSON file. Every field has a default, so a
//! partial file (or none at all) is valid.

use crate::capture::Resolution;
use crate::recorder::RecordingMode;
use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub stream: StreamConfig,
    pub recording: RecorderConfig,
}

impl AppConfig {
    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            tracing::info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }
}

/// Camera device connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub status_interval_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.4.1".to_string(),
            request_timeout_ms: 5000,
            status_interval_ms: 2000,
        }
    }
}

impl DeviceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(1))
    }

    /// Absolute URL for a device API path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Live stream and watchdog tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamConfig {
    pub stream_path: String,
    pub stall_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    /// Gap between two loads above which one dropped frame is counted
    pub drop_gap_ms: u64,
    pub fps_window: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_path: "/stream".to_string(),
            stall_timeout_ms: 5000,
            reconnect_delay_ms: 2000,
            drop_gap_ms: 2000,
            fps_window: 30,
        }
    }
}

impl StreamConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn drop_gap(&self) -> Duration {
        Duration::from_millis(self.drop_gap_ms)
    }
}

/// Local recording settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecorderConfig {
    pub output_dir: PathBuf,
    pub capture_fps: u32,
    pub default_width: u32,
    pub default_height: u32,
    pub chunk_interval_ms: u64,
    pub finalize_timeout_ms: u64,
    pub ffmpeg_path: String,
    pub mode: RecordingMode,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./recordings"),
            capture_fps: 20,
            default_width: Resolution::FALLBACK.width,
            default_height: Resolution::FALLBACK.height,
            chunk_interval_ms: 1000,
            finalize_timeout_ms: 10_000,
            ffmpeg_path: "ffmpeg".to_string(),
            mode: RecordingMode::Local,
        }
    }
}

impl RecorderConfig {
    /// Raster size used when the stream has not reported one yet
    pub fn default_resolution(&self) -> Resolution {
        let resolution = Resolution::new(self.default_width, self.default_height);
        if resolution.is_empty() {
            Resolution::FALLBACK
        } else {
            resolution
        }
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms.max(1))
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("camview.json")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.stream.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(config.recording.default_resolution(), Resolution::FALLBACK);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("camview.json");
        std::fs::write(
            &path,
            r#"{"device":{"baseUrl":"http://10.0.0.7/"},"recording":{"mode":"remote","captureFps":10}}"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.device.url("/api/status"), "http://10.0.0.7/api/status");
        assert_eq!(config.device.request_timeout_ms, 5000);
        assert_eq!(config.recording.mode, RecordingMode::Remote);
        assert_eq!(config.recording.capture_fps, 10);
        assert_eq!(config.stream.stream_path, "/stream");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("camview.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(AppError::Config(_))));
    }

    #[test]
    fn test_zero_default_size_uses_fallback() {
        let config = RecorderConfig {
            default_width: 0,
            ..RecorderConfig::default()
        };
        assert_eq!(config.default_resolution(), Resolution::FALLBACK);
    }
}
