//! Resource teardown
//!
//! One idempotent routine that releases everything a recording can hold:
//! the capture loop (via the shared flag), the encoder and the pending
//! reconnect. Between recordings the live stream keeps reconnecting, so
//! [`ResourceReaper::reap_session`] re-arms a fresh reconnect after teardown.

use crate::encoder::EncoderSlot;
use crate::watchdog::ReconnectTimer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What a single [`ResourceReaper::reap`] call actually released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub encoder_closed: bool,
    pub encoder_released: bool,
    pub reconnect_cancelled: bool,
}

impl ReapReport {
    pub fn released_anything(&self) -> bool {
        self.encoder_closed || self.encoder_released || self.reconnect_cancelled
    }
}

#[derive(Clone)]
pub struct ResourceReaper {
    recording: Arc<AtomicBool>,
    encoder: EncoderSlot,
    reconnect: Arc<Mutex<Option<Arc<ReconnectTimer>>>>,
}

impl ResourceReaper {
    /// Create a reaper with an empty encoder slot and a cleared flag
    pub fn new() -> Self {
        Self {
            recording: Arc::new(AtomicBool::new(false)),
            encoder: Arc::new(Mutex::new(None)),
            reconnect: Arc::new(Mutex::new(None)),
        }
    }

    /// Also cancel this reconnect timer on teardown
    pub fn attach_reconnect_timer(&self, timer: Arc<ReconnectTimer>) {
        *self.reconnect.lock() = Some(timer);
    }

    /// The "still recording" flag the capture loop checks every tick
    pub fn recording_flag(&self) -> Arc<AtomicBool> {
        self.recording.clone()
    }

    pub fn encoder_slot(&self) -> EncoderSlot {
        self.encoder.clone()
    }

    /// Release the recording's resources while the host keeps running.
    ///
    /// A reconnect cancelled by the teardown is re-armed with a fresh delay
    /// when the stream still targets the live endpoint.
    pub fn reap_session(&self) -> ReapReport {
        let report = self.reap();
        if report.reconnect_cancelled {
            let timer = self.reconnect.lock().clone();
            if timer.map_or(false, |timer| timer.resume()) {
                tracing::debug!("Live stream reconnect re-armed after teardown");
            }
        }
        report
    }

    /// Release everything. Safe to call any number of times in any state.
    pub fn reap(&self) -> ReapReport {
        let mut report = ReapReport::default();

        self.recording.store(false, Ordering::SeqCst);

        // Taking the handle out of the slot makes later reaps no-ops
        let handle = self.encoder.lock().take();
        if let Some(mut handle) = handle {
            if handle.is_active() {
                handle.close();
                report.encoder_closed = true;
            }
            handle.release();
            report.encoder_released = true;
        }

        let timer = self.reconnect.lock().clone();
        if let Some(timer) = timer {
            report.reconnect_cancelled = timer.cancel();
        }

        if report.released_anything() {
            tracing::debug!("Resources reaped: {:?}", report);
        }
        report
    }
}

impl Default for ResourceReaper {
    fn default() -> Self {
        Self::new()
    }
}
