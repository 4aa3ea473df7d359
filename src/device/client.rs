//! Device control client
//!
//! Request/response calls against the camera's HTTP API with a bounded
//! timeout.

use super::status::DeviceStatus;
use crate::config::DeviceConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Device API errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Device returned status {0}")]
    Status(u16),
}

/// Remote (SD card) recording command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    Start,
    Stop,
}

#[derive(Debug, Serialize)]
struct RecordRequest {
    action: RecordAction,
}

/// Calls the recording core makes against the device
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Ask the device to start or stop recording to its SD card
    async fn set_remote_recording(&self, action: RecordAction) -> Result<(), DeviceError>;

    /// Fetch the device's live status
    async fn status(&self) -> Result<DeviceStatus, DeviceError>;
}

pub struct HttpDeviceClient {
    client: reqwest::Client,
    config: DeviceConfig,
}

impl HttpDeviceClient {
    pub fn new(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl DeviceControl for HttpDeviceClient {
    async fn set_remote_recording(&self, action: RecordAction) -> Result<(), DeviceError> {
        let url = self.config.url("/api/record");
        tracing::debug!("POST {} {:?}", url, action);

        let response = self
            .client
            .post(&url)
            .json(&RecordRequest { action })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeviceError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    async fn status(&self) -> Result<DeviceStatus, DeviceError> {
        let response = self.client.get(self.config.url("/api/status")).send().await?;

        if !response.status().is_success() {
            return Err(DeviceError::Status(response.status().as_u16()));
        }
        Ok(response.json::<DeviceStatus>().await?)
    }
}
