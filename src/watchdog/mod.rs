//! Stream resilience
//!
//! This module watches the live stream for failures, reconnects after a
//! fixed delay and derives liveness metrics from frame timing.

pub mod metrics;
pub mod monitor;

pub use metrics::{LivenessMetrics, LivenessSnapshot};
pub use monitor::{ReconnectTimer, StreamStatus, StreamWatchdog, WatchdogState};
