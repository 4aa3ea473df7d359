//! Device status polling
//!
//! Polls the device's status document on a fixed interval and publishes
//! each result as a [`DeviceReport`].

use super::client::DeviceControl;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Status document served by the device. Missing fields default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceStatus {
    pub status: String,
    pub rtsp: String,
    pub onvif_enabled: bool,
    pub motion: bool,
    /// Remote (SD card) recording in progress
    pub recording: bool,
    pub sd_mounted: bool,
    /// Free heap in bytes
    pub heap: u64,
    /// Seconds since boot
    pub uptime: u64,
    /// Wi-Fi signal strength in dBm
    pub rssi: Option<i32>,
    pub autoflash: bool,
}

impl DeviceStatus {
    /// Signal quality as a 0-100 percentage, mapped linearly from -100..-50 dBm
    pub fn signal_quality(&self) -> Option<u8> {
        self.rssi
            .map(|rssi| ((rssi.clamp(-100, -50) + 100) * 2) as u8)
    }
}

/// One poll result
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceReport {
    Online(DeviceStatus),
    Offline(String),
}

impl DeviceReport {
    pub fn is_online(&self) -> bool {
        matches!(self, DeviceReport::Online(_))
    }
}

pub struct StatusPoller {
    device: Arc<dyn DeviceControl>,
    interval: Duration,
    last: RwLock<Option<DeviceReport>>,
    report_tx: broadcast::Sender<DeviceReport>,
}

impl StatusPoller {
    /// Create a poller; nothing is requested until [`spawn`](Self::spawn)
    pub fn new(device: Arc<dyn DeviceControl>, interval: Duration) -> Self {
        let (report_tx, _) = broadcast::channel(16);
        Self {
            device,
            interval,
            last: RwLock::new(None),
            report_tx,
        }
    }

    /// Subscribe to poll results
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceReport> {
        self.report_tx.subscribe()
    }

    /// Result of the most recent poll
    pub fn last_report(&self) -> Option<DeviceReport> {
        self.last.read().clone()
    }

    /// Poll once and publish the result
    pub async fn poll_once(&self) -> DeviceReport {
        let report = match self.device.status().await {
            Ok(status) => DeviceReport::Online(status),
            Err(err) => DeviceReport::Offline(err.to_string()),
        };

        let was_online = self.last.read().as_ref().map(DeviceReport::is_online);
        match (&report, was_online) {
            (DeviceReport::Offline(reason), Some(true) | None) => {
                tracing::warn!("Device offline: {}", reason)
            }
            (DeviceReport::Online(_), Some(false) | None) => tracing::info!("Device online"),
            _ => {}
        }

        *self.last.write() = Some(report.clone());
        let _ = self.report_tx.send(report.clone());
        report
    }

    /// Poll on a fixed interval until the task is aborted
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.poll_once().await;
            }
        })
    }
}
