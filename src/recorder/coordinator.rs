//! Recording coordinator
//!
//! The recording state machine. Owns the capture loop and encoder session of
//! a local recording, mirrors remote (device-side) recording optimistically,
//! and reconciles the remote case against polled device status.

use super::delivery::ArtifactSink;
use super::reaper::{ReapReport, ResourceReaper};
use super::state::{
    RecordingArtifact, RecordingError, RecordingEvent, RecordingMode, RecordingResult,
    RecordingSession, RecordingState, SessionInfo,
};
use crate::capture::{CaptureLoop, FrameSource};
use crate::config::RecorderConfig;
use crate::device::{DeviceControl, DeviceError, DeviceStatus, RecordAction};
use crate::encoder::{
    CapabilityProbe, ContainerFormat, EncoderBackend, EncoderError, EncoderOptions, EncoderOutput,
    EncoderSession,
};
use crate::watchdog::ReconnectTimer;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Collaborators the coordinator drives
pub struct RecorderDeps {
    pub source: Arc<dyn FrameSource>,
    pub backend: Arc<dyn EncoderBackend>,
    pub probe: Arc<dyn CapabilityProbe>,
    pub device: Arc<dyn DeviceControl>,
    pub sink: Arc<dyn ArtifactSink>,
}

pub struct RecordingCoordinator {
    /// Current recording state
    state: Arc<RwLock<RecordingState>>,

    /// Bumped on every transition; stale remote reverts compare against it
    epoch: Arc<AtomicU64>,

    /// Mode of the next recording, or of the current one while recording
    mode: RecordingMode,

    /// Active local recording
    session: Option<RecordingSession>,

    /// Last remote start/stop request still in flight
    dispatch: Option<JoinHandle<()>>,

    deps: RecorderDeps,
    reaper: ResourceReaper,
    config: RecorderConfig,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl RecordingCoordinator {
    /// Create a new recording coordinator
    pub fn new(deps: RecorderDeps, config: RecorderConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(RecordingState::Idle)),
            epoch: Arc::new(AtomicU64::new(0)),
            mode: config.mode,
            session: None,
            dispatch: None,
            deps,
            reaper: ResourceReaper::new(),
            config,
            event_tx,
        }
    }

    /// Let teardown cancel the stream watchdog's pending reconnect
    pub fn attach_reconnect_timer(&self, timer: Arc<ReconnectTimer>) {
        self.reaper.attach_reconnect_timer(timer);
    }

    /// Get current recording state
    pub fn state(&self) -> RecordingState {
        *self.state.read()
    }

    /// Mode used by the next (or current) recording
    pub fn mode(&self) -> RecordingMode {
        self.mode
    }

    /// Details of the running local session, if any
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.session.as_ref().map(|session| session.info.clone())
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    /// Change the mode of the next recording. Rejected while recording.
    pub fn select_mode(&mut self, mode: RecordingMode) -> RecordingResult<()> {
        let state = self.state.write();
        if *state == RecordingState::Recording {
            return Err(RecordingError::ModeLocked);
        }
        if mode == self.mode {
            return Ok(());
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        drop(state);

        tracing::info!("Recording mode: {} -> {}", self.mode, mode);
        self.mode = mode;
        self.reaper.reap_session();
        Ok(())
    }

    /// Start recording. A no-op while already recording.
    pub async fn start(&mut self, mode: RecordingMode) -> RecordingResult<()> {
        if self.state() == RecordingState::Recording {
            tracing::debug!("Start ignored, already recording");
            return Ok(());
        }
        self.mode = mode;

        match mode {
            RecordingMode::Local => self.start_local(),
            RecordingMode::Remote => {
                self.dispatch_remote(RecordAction::Start);
                self.notify(RecordingEvent::Notice("Recording to SD card".to_string()));
                Ok(())
            }
        }
    }

    /// Stop recording. A no-op while idle.
    ///
    /// Returns where a local recording was saved.
    pub async fn stop(&mut self) -> RecordingResult<Option<PathBuf>> {
        if self.state() == RecordingState::Idle {
            tracing::debug!("Stop ignored, not recording");
            return Ok(None);
        }

        match self.mode {
            RecordingMode::Local => self.stop_local().await,
            RecordingMode::Remote => {
                self.dispatch_remote(RecordAction::Stop);
                Ok(None)
            }
        }
    }

    /// Start with the selected mode when idle, stop when recording
    pub async fn toggle(&mut self) -> RecordingResult<Option<PathBuf>> {
        match self.state() {
            RecordingState::Idle => self.start(self.mode).await.map(|_| None),
            RecordingState::Recording => self.stop().await,
        }
    }

    /// Apply a polled device status.
    ///
    /// Without an SD card remote mode is unavailable and falls back to local.
    /// In remote mode the device's recording flag is the ground truth.
    pub fn reconcile(&mut self, status: &DeviceStatus) {
        if self.mode != RecordingMode::Remote {
            return;
        }

        if !status.sd_mounted && self.state() == RecordingState::Idle {
            tracing::warn!("SD card not found, switching to local recording");
            self.mode = RecordingMode::Local;
            self.epoch.fetch_add(1, Ordering::SeqCst);
            self.notify(RecordingEvent::Notice(
                "SD card not found, recording locally".to_string(),
            ));
            return;
        }

        match (status.recording, self.state()) {
            (true, RecordingState::Idle) => {
                tracing::info!("Device reports remote recording in progress");
                self.transition(RecordingState::Recording);
                self.notify(RecordingEvent::Started {
                    mode: RecordingMode::Remote,
                });
            }
            (false, RecordingState::Recording) => {
                tracing::info!("Device reports remote recording stopped");
                self.transition(RecordingState::Idle);
                self.notify(RecordingEvent::Stopped {
                    mode: RecordingMode::Remote,
                });
            }
            _ => {}
        }
    }

    /// Wait for an in-flight remote request to complete
    pub async fn settle(&mut self) {
        if let Some(dispatch) = self.dispatch.take() {
            let _ = dispatch.await;
        }
    }

    /// Host teardown: discard any local recording and release everything
    pub fn shutdown(&mut self) -> ReapReport {
        let report = self.reaper.reap();
        if let Some(session) = self.session.take() {
            tracing::warn!("Discarding unfinished recording {}", session.info.id);
            session.capture.abort();
            self.transition(RecordingState::Idle);
        }
        report
    }

    fn start_local(&mut self) -> RecordingResult<()> {
        let resolution = self
            .deps
            .source
            .geometry()
            .filter(|geometry| !geometry.is_empty())
            .unwrap_or_else(|| self.config.default_resolution());

        let options = EncoderOptions {
            resolution,
            fps: self.config.capture_fps,
            chunk_interval: self.config.chunk_interval(),
        };

        let slot = self.reaper.encoder_slot();
        let events = self.event_tx.clone();
        let encoder = EncoderSession::open(
            self.deps.backend.as_ref(),
            self.deps.probe.as_ref(),
            &options,
            &slot,
            move |err| {
                let _ = events.send(RecordingEvent::Error(format!("Local recording failed: {}", err)));
            },
        );

        let encoder = match encoder {
            Ok(encoder) => encoder,
            Err(err) => {
                tracing::error!("Local recording failed: {}", err);
                let err = RecordingError::EncoderFatal(err);
                self.notify(RecordingEvent::Error(err.to_string()));
                return Err(err);
            }
        };

        let recording = self.reaper.recording_flag();
        recording.store(true, Ordering::SeqCst);
        let capture = CaptureLoop::new(
            self.deps.source.clone(),
            recording,
            slot,
            resolution,
            self.config.capture_fps,
        )
        .start();

        let session = RecordingSession::new(resolution, encoder, capture);
        tracing::info!(
            "Recording {} started: {} as {}",
            session.info.id,
            resolution,
            session.info.container
        );
        self.session = Some(session);

        self.transition(RecordingState::Recording);
        self.notify(RecordingEvent::Started {
            mode: RecordingMode::Local,
        });
        Ok(())
    }

    async fn stop_local(&mut self) -> RecordingResult<Option<PathBuf>> {
        let Some(session) = self.session.take() else {
            self.reaper.reap_session();
            self.transition(RecordingState::Idle);
            return Ok(None);
        };

        // The capture loop exits on its next tick once the flag is clear
        self.reaper.recording_flag().store(false, Ordering::SeqCst);
        match session.capture.await {
            Ok(stats) => tracing::debug!("Capture finished: {:?}", stats),
            Err(err) => tracing::warn!("Capture loop ended abnormally: {}", err),
        }

        let container = session.info.container;
        let finished = session
            .encoder
            .finish(&self.reaper.encoder_slot(), self.config.finalize_timeout())
            .await;
        let fatal_reported = matches!(&finished, Ok(output) if output.fatal.is_some());

        let outcome = match finished {
            Ok(output) => self.deliver(container, output).await,
            Err(err) => Err(RecordingError::EncoderFatal(err)),
        };

        self.reaper.reap_session();
        self.transition(RecordingState::Idle);
        self.notify(RecordingEvent::Stopped {
            mode: RecordingMode::Local,
        });

        if let Err(err) = &outcome {
            tracing::error!("Recording {} failed: {}", session.info.id, err);
            // Mid-stream encoder failures were already surfaced when they happened
            if !(fatal_reported && matches!(err, RecordingError::EncoderFatal(_))) {
                self.notify(RecordingEvent::Error(err.to_string()));
            }
        }
        outcome.map(Some)
    }

    async fn deliver(
        &self,
        container: ContainerFormat,
        output: EncoderOutput,
    ) -> RecordingResult<PathBuf> {
        let fatal = output.fatal.clone();
        let artifact = match RecordingArtifact::from_chunks(container, output.chunks) {
            Some(artifact) => artifact,
            None => {
                return Err(fatal
                    .map(RecordingError::EncoderFatal)
                    .unwrap_or(RecordingError::EmptyOutput))
            }
        };

        let path = self.deps.sink.deliver(&artifact).await?;
        self.notify(RecordingEvent::Saved {
            path: path.clone(),
            container,
            bytes: artifact.len(),
        });
        self.notify(RecordingEvent::Notice(format!(
            "Saved as .{}",
            container.extension().to_uppercase()
        )));
        Ok(path)
    }

    /// Transition optimistically and send the request in the background.
    ///
    /// A transport failure reverts the transition unless another one happened
    /// since.
    fn dispatch_remote(&mut self, action: RecordAction) {
        let (target, revert) = match action {
            RecordAction::Start => (RecordingState::Recording, RecordingState::Idle),
            RecordAction::Stop => (RecordingState::Idle, RecordingState::Recording),
        };
        let epoch = self.transition(target);
        self.notify(match action {
            RecordAction::Start => RecordingEvent::Started {
                mode: RecordingMode::Remote,
            },
            RecordAction::Stop => RecordingEvent::Stopped {
                mode: RecordingMode::Remote,
            },
        });

        let device = self.deps.device.clone();
        let state = self.state.clone();
        let current_epoch = self.epoch.clone();
        let events = self.event_tx.clone();

        let dispatch = tokio::spawn(async move {
            let err = match device.set_remote_recording(action).await {
                Ok(()) => {
                    tracing::debug!("Remote {:?} accepted", action);
                    return;
                }
                Err(err @ DeviceError::Http(_)) => err,
                Err(err) => {
                    tracing::warn!("Remote {:?} rejected ({}), leaving it to the status poll", action, err);
                    return;
                }
            };

            let mut state = state.write();
            if current_epoch.load(Ordering::SeqCst) != epoch {
                tracing::debug!("Remote {:?} failed after a newer transition, not reverting", action);
                return;
            }
            *state = revert;
            current_epoch.fetch_add(1, Ordering::SeqCst);
            drop(state);

            tracing::warn!("Remote {:?} failed, reverted to {:?}: {}", action, revert, err);
            let _ = events.send(RecordingEvent::Error(format!(
                "Remote recording request failed: {}",
                err
            )));
        });

        // A superseded request keeps running detached
        self.dispatch = Some(dispatch);
    }

    /// Set the state and return the new epoch
    fn transition(&self, next: RecordingState) -> u64 {
        let mut state = self.state.write();
        *state = next;
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, event: RecordingEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Drop for RecordingCoordinator {
    fn drop(&mut self) {
        self.reaper.reap();
    }
}
