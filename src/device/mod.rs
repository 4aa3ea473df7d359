//! Camera device API
//!
//! The subset of the device's HTTP control API the recorder depends on:
//! remote recording commands and the status document.

pub mod client;
pub mod status;

pub use client::{DeviceControl, DeviceError, HttpDeviceClient, RecordAction};
pub use status::{DeviceReport, DeviceStatus, StatusPoller};
