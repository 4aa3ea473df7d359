//! Encoder session
//!
//! Negotiates a container, constructs the encoder (retrying once with the
//! backend's default codec), and collects the encoder's chunk stream in
//! delivery order until it finalizes.

use super::negotiate::negotiate;
use super::types::{
    CapabilityProbe, ContainerFormat, EncoderBackend, EncoderError, EncoderEvent, EncoderOptions,
    EncoderSlot,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Everything an encoder produced between open and finalize
#[derive(Debug, Default)]
pub struct EncoderOutput {
    /// Non-empty chunks in delivery order
    pub chunks: Vec<Vec<u8>>,
    /// Set when the encoder failed after opening
    pub fatal: Option<EncoderError>,
    /// True when the encoder signalled a clean finalize
    pub finalized: bool,
}

impl EncoderOutput {
    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}

/// One open encoder and the task collecting its output
pub struct EncoderSession {
    container: ContainerFormat,
    collector: JoinHandle<EncoderOutput>,
}

impl EncoderSession {
    /// Negotiate and open an encoder, installing its handle in `slot`.
    ///
    /// `on_fatal` is invoked once if the encoder fails after opening.
    pub fn open<F>(
        backend: &dyn EncoderBackend,
        probe: &dyn CapabilityProbe,
        options: &EncoderOptions,
        slot: &EncoderSlot,
        on_fatal: F,
    ) -> Result<Self, EncoderError>
    where
        F: Fn(&EncoderError) + Send + 'static,
    {
        let preferred = negotiate(probe);
        tracing::info!("Recording using: {}", preferred);

        let opened = match backend.open(Some(preferred), options) {
            Ok(opened) => opened,
            Err(err) => {
                tracing::warn!("Encoder for {} failed ({}), trying default", preferred, err);
                backend.open(None, options)?
            }
        };

        let container = opened.handle.container();
        *slot.lock() = Some(opened.handle);
        let collector = tokio::spawn(collect_output(opened.events, on_fatal));

        Ok(Self {
            container,
            collector,
        })
    }

    /// Container actually produced (the default one after a fallback)
    pub fn container(&self) -> ContainerFormat {
        self.container
    }

    /// Close the encoder and wait for its final chunk.
    ///
    /// The handle stays in `slot`; releasing it is the reaper's job.
    pub async fn finish(
        self,
        slot: &EncoderSlot,
        timeout: Duration,
    ) -> Result<EncoderOutput, EncoderError> {
        if let Some(handle) = slot.lock().as_mut() {
            handle.close();
        }

        match tokio::time::timeout(timeout, self.collector).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(join_err)) => Err(EncoderError::Io(join_err.to_string())),
            Err(_) => Err(EncoderError::FinalizeTimeout(timeout.as_millis() as u64)),
        }
    }
}

async fn collect_output<F>(mut events: mpsc::UnboundedReceiver<EncoderEvent>, on_fatal: F) -> EncoderOutput
where
    F: Fn(&EncoderError),
{
    let mut output = EncoderOutput::default();

    while let Some(event) = events.recv().await {
        match event {
            EncoderEvent::Chunk(bytes) if bytes.is_empty() => {}
            EncoderEvent::Chunk(bytes) => output.chunks.push(bytes),
            EncoderEvent::Fatal(err) => {
                tracing::error!("Encoder failed: {}", err);
                on_fatal(&err);
                output.fatal = Some(err);
            }
            EncoderEvent::Finalized => {
                output.finalized = true;
                break;
            }
        }
    }

    tracing::debug!(
        "Encoder output collected: {} chunks, {} bytes",
        output.chunks.len(),
        output.total_bytes()
    );
    output
}
