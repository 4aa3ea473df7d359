//! Live frame source over HTTP
//!
//! Pulls the camera's MJPEG endpoint, keeps the latest decoded frame and
//! reports every load and failure as a [`FrameEvent`].

use super::mjpeg::{decode_jpeg, MjpegParser};
use super::traits::{CaptureError, FrameEvent, FrameSource, Raster, StreamControl};
use crate::config::{DeviceConfig, StreamConfig};
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Where the source currently points
#[derive(Debug, Clone, PartialEq, Eq)]
enum SourceTarget {
    Live(String),
    Paused,
}

#[derive(Debug)]
struct SourceShared {
    frame: RwLock<Option<Raster>>,
    last_load: RwLock<Option<Instant>>,
}

/// Frame source backed by the camera's `/stream` endpoint
pub struct LiveFrameSource {
    client: reqwest::Client,
    endpoint: String,
    stall_timeout: Duration,
    target: RwLock<SourceTarget>,
    shared: Arc<SourceShared>,
    fetch: Mutex<Option<JoinHandle<()>>>,
    event_tx: broadcast::Sender<FrameEvent>,
}

impl LiveFrameSource {
    /// Create a paused source; call [`connect`](Self::connect) to start streaming
    pub fn new(device: &DeviceConfig, stream: &StreamConfig) -> Result<Self, CaptureError> {
        // No overall request timeout: the body never ends while streaming
        let client = reqwest::Client::builder()
            .connect_timeout(device.request_timeout())
            .build()?;
        let (event_tx, _) = broadcast::channel(256);

        Ok(Self {
            client,
            endpoint: format!(
                "{}{}",
                device.base_url.trim_end_matches('/'),
                stream.stream_path
            ),
            stall_timeout: stream.stall_timeout(),
            target: RwLock::new(SourceTarget::Paused),
            shared: Arc::new(SourceShared {
                frame: RwLock::new(None),
                last_load: RwLock::new(None),
            }),
            fetch: Mutex::new(None),
            event_tx,
        })
    }

    /// Subscribe to load/error events
    pub fn subscribe(&self) -> broadcast::Receiver<FrameEvent> {
        self.event_tx.subscribe()
    }

    /// Point the source at the live endpoint and start streaming
    pub fn connect(&self) {
        let address = live_address(&self.endpoint, chrono::Utc::now().timestamp_millis());
        tracing::info!("Connecting to live stream {}", address);
        *self.target.write() = SourceTarget::Live(address.clone());
        self.spawn_fetch(address);
    }

    /// Stop streaming and drop the current frame
    pub fn pause(&self) {
        *self.target.write() = SourceTarget::Paused;
        if let Some(handle) = self.fetch.lock().take() {
            handle.abort();
        }
        *self.shared.frame.write() = None;
        tracing::info!("Live stream paused");
        let _ = self.event_tx.send(FrameEvent::Paused);
    }

    /// Pause when streaming, connect when paused
    pub fn toggle(&self) {
        if self.targets_live() {
            self.pause();
        } else {
            self.connect();
        }
    }

    fn spawn_fetch(&self, address: String) {
        let _ = self.event_tx.send(FrameEvent::Connecting);

        let client = self.client.clone();
        let shared = self.shared.clone();
        let events = self.event_tx.clone();
        let stall_timeout = self.stall_timeout;

        let handle = tokio::spawn(async move {
            if let Err(err) = fetch_stream(&client, &address, stall_timeout, &shared, &events).await {
                tracing::warn!("Stream error/disconnect: {}", err);
                let _ = events.send(FrameEvent::Error {
                    reason: err.to_string(),
                });
            }
        });

        if let Some(previous) = self.fetch.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl FrameSource for LiveFrameSource {
    fn current_frame(&self) -> Option<Raster> {
        self.shared.frame.read().clone()
    }

    fn last_load(&self) -> Option<Instant> {
        *self.shared.last_load.read()
    }
}

impl StreamControl for LiveFrameSource {
    fn targets_live(&self) -> bool {
        matches!(*self.target.read(), SourceTarget::Live(_))
    }

    fn reissue(&self) {
        let address = live_address(&self.endpoint, chrono::Utc::now().timestamp_millis());
        tracing::debug!("Re-issuing stream request {}", address);
        *self.target.write() = SourceTarget::Live(address.clone());
        self.spawn_fetch(address);
    }
}

impl Drop for LiveFrameSource {
    fn drop(&mut self) {
        if let Some(handle) = self.fetch.lock().take() {
            handle.abort();
        }
    }
}

/// Wait until `events` reports a loaded frame.
///
/// Returns false when `timeout` elapses first or the source is gone. Errors
/// in between are ignored; the watchdog reissues the request meanwhile.
pub async fn wait_for_load(
    events: &mut broadcast::Receiver<FrameEvent>,
    timeout: Duration,
) -> bool {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(FrameEvent::Loaded { .. }) => return true,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    };
    tokio::time::timeout(timeout, wait).await.unwrap_or(false)
}

/// Cache-busted stream address
fn live_address(endpoint: &str, millis: i64) -> String {
    format!("{}?t={}", endpoint, millis)
}

async fn fetch_stream(
    client: &reqwest::Client,
    address: &str,
    stall_timeout: Duration,
    shared: &SourceShared,
    events: &broadcast::Sender<FrameEvent>,
) -> Result<(), CaptureError> {
    let stalled = || CaptureError::Stalled(stall_timeout.as_millis() as u64);

    let response = tokio::time::timeout(stall_timeout, client.get(address).send())
        .await
        .map_err(|_| stalled())??;

    if !response.status().is_success() {
        return Err(CaptureError::Status(response.status().as_u16()));
    }

    let mut body = response.bytes_stream();
    let mut parser = MjpegParser::new();

    loop {
        let chunk = match tokio::time::timeout(stall_timeout, body.next())
            .await
            .map_err(|_| stalled())?
        {
            Some(chunk) => chunk?,
            None => return Err(CaptureError::EndOfStream),
        };

        for jpeg in parser.push(&chunk)? {
            match decode_jpeg(&jpeg) {
                Ok(raster) => {
                    let now = Instant::now();
                    *shared.frame.write() = Some(raster);
                    *shared.last_load.write() = Some(now);
                    let _ = events.send(FrameEvent::Loaded { at: now });
                }
                Err(err) => tracing::debug!("Skipping undecodable frame: {}", err),
            }
        }
    }
}
