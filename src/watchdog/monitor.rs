//! Stream watchdog
//!
//! Reacts to frame source events: a load error schedules a fixed-delay
//! reconnect, a successful load feeds the liveness metrics. The watchdog
//! never polls on its own.

use super::metrics::{LivenessMetrics, LivenessSnapshot};
use crate::capture::{FrameEvent, StreamControl};
use crate::config::StreamConfig;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Connection state as seen by the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogState {
    Connected,
    Reconnecting,
}

/// Status signal for the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Connecting,
    Online,
    Reconnecting,
    Paused,
}

/// Single pending reconnect. Arming again replaces the pending one.
pub struct ReconnectTimer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
    /// Stream the last reconnect was armed for
    target: Mutex<Option<Arc<dyn StreamControl>>>,
}

impl ReconnectTimer {
    /// Create an idle timer with a fixed reconnect delay
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
            target: Mutex::new(None),
        }
    }

    /// Fixed wait before a reconnect
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Reissue the stream request after the fixed delay, unless the user
    /// paused the stream in the meantime.
    pub fn arm(&self, target: Arc<dyn StreamControl>) {
        let deadline = Instant::now() + self.delay;
        *self.target.lock() = Some(target.clone());

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if target.targets_live() {
                tracing::info!("Reconnecting to live stream");
                target.reissue();
            } else {
                tracing::debug!("Reconnect skipped, stream is paused");
            }
        });

        if let Some(previous) = self.pending.lock().replace(task) {
            previous.abort();
        }
    }

    /// Cancel the pending reconnect. Returns true if one was outstanding.
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(task) => {
                let outstanding = !task.is_finished();
                task.abort();
                outstanding
            }
            None => false,
        }
    }

    /// Arm a fresh reconnect for the last target if it still points at the
    /// live endpoint and nothing is pending. Returns true if one was armed.
    pub fn resume(&self) -> bool {
        if self.is_pending() {
            return false;
        }
        let target = self.target.lock().clone();
        match target {
            Some(target) if target.targets_live() => {
                self.arm(target);
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        if let Some(task) = self.pending.get_mut().take() {
            task.abort();
        }
    }
}

/// Watches a frame source and keeps it connected
pub struct StreamWatchdog {
    control: Arc<dyn StreamControl>,
    timer: Arc<ReconnectTimer>,
    metrics: Mutex<LivenessMetrics>,
    state: RwLock<WatchdogState>,
    status: RwLock<Option<StreamStatus>>,
    status_tx: broadcast::Sender<StreamStatus>,
}

impl StreamWatchdog {
    /// Create a watchdog for `control`; feed it with [`spawn`](Self::spawn)
    pub fn new(control: Arc<dyn StreamControl>, config: &StreamConfig) -> Self {
        let (status_tx, _) = broadcast::channel(64);
        Self {
            control,
            timer: Arc::new(ReconnectTimer::new(config.reconnect_delay())),
            metrics: Mutex::new(LivenessMetrics::new(config.fps_window, config.drop_gap())),
            state: RwLock::new(WatchdogState::Connected),
            status: RwLock::new(None),
            status_tx,
        }
    }

    /// Get current connection state
    pub fn state(&self) -> WatchdogState {
        *self.state.read()
    }

    /// Last published status, if any
    pub fn status(&self) -> Option<StreamStatus> {
        *self.status.read()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> broadcast::Receiver<StreamStatus> {
        self.status_tx.subscribe()
    }

    /// Current liveness metrics
    pub fn metrics(&self) -> LivenessSnapshot {
        self.metrics.lock().snapshot()
    }

    /// Shared with the resource reaper so teardown can cancel a pending reconnect
    pub fn reconnect_timer(&self) -> Arc<ReconnectTimer> {
        self.timer.clone()
    }

    /// React to one frame source event
    pub fn handle_event(&self, event: FrameEvent) {
        match event {
            FrameEvent::Connecting => self.publish(StreamStatus::Connecting),
            FrameEvent::Loaded { at } => self.on_load(at),
            FrameEvent::Error { reason } => self.on_error(&reason),
            FrameEvent::Paused => {
                self.timer.cancel();
                self.publish(StreamStatus::Paused);
            }
        }
    }

    fn on_load(&self, at: Instant) {
        let previous = std::mem::replace(&mut *self.state.write(), WatchdogState::Connected);
        if previous == WatchdogState::Reconnecting {
            tracing::info!("Live stream back online");
        }
        self.metrics.lock().record_load(at);
        self.publish(StreamStatus::Online);
    }

    fn on_error(&self, reason: &str) {
        *self.state.write() = WatchdogState::Reconnecting;
        tracing::warn!(
            "Stream error ({}), retrying in {:?}",
            reason,
            self.timer.delay()
        );
        self.publish(StreamStatus::Reconnecting);
        self.timer.arm(self.control.clone());
    }

    fn publish(&self, status: StreamStatus) {
        let mut current = self.status.write();
        if *current == Some(status) {
            return;
        }
        *current = Some(status);
        drop(current);
        tracing::debug!("Stream status: {:?}", status);
        let _ = self.status_tx.send(status);
    }

    /// Drive the watchdog from a frame source's event stream
    pub fn spawn(self: Arc<Self>, mut events: broadcast::Receiver<FrameEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.handle_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Watchdog lagged behind by {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Watchdog stopped");
        })
    }
}
