//! Liveness metrics
//!
//! Rolling frame-rate estimate and dropped-frame count derived from the
//! timestamps of successful frame loads.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Frame timing statistics for the live stream
#[derive(Debug, Clone)]
pub struct LivenessMetrics {
    window: VecDeque<Instant>,
    capacity: usize,
    drop_gap: Duration,
    dropped: u64,
    last_good: Option<Instant>,
}

/// Point-in-time view of [`LivenessMetrics`] for display
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessSnapshot {
    /// Absent when fewer than two loads are in the window
    pub fps: Option<f64>,
    pub dropped_frames: u64,
    pub samples: usize,
    pub since_last_good_ms: Option<u64>,
}

impl LivenessMetrics {
    pub fn new(capacity: usize, drop_gap: Duration) -> Self {
        let capacity = capacity.max(2);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            drop_gap,
            dropped: 0,
            last_good: None,
        }
    }

    /// Record one successful load
    pub fn record_load(&mut self, at: Instant) {
        if let Some(previous) = self.last_good {
            if at.saturating_duration_since(previous) > self.drop_gap {
                self.dropped += 1;
            }
        }

        self.window.push_back(at);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }
        self.last_good = Some(at);
    }

    /// `(n - 1) / elapsed seconds` across the window
    pub fn fps(&self) -> Option<f64> {
        if self.window.len() < 2 {
            return None;
        }
        let first = self.window.front()?;
        let last = self.window.back()?;
        let elapsed = last.saturating_duration_since(*first).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        Some((self.window.len() - 1) as f64 / elapsed)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    pub fn last_good(&self) -> Option<Instant> {
        self.last_good
    }

    pub fn samples(&self) -> usize {
        self.window.len()
    }

    pub fn snapshot(&self) -> LivenessSnapshot {
        LivenessSnapshot {
            fps: self.fps(),
            dropped_frames: self.dropped,
            samples: self.window.len(),
            since_last_good_ms: self
                .last_good
                .map(|at| Instant::now().saturating_duration_since(at).as_millis() as u64),
        }
    }
}
