//! camview - record a network camera's live stream.
//!
//! This is the library crate for the camview recorder. It provides the live
//! frame source, the local recording pipeline, the stream watchdog and the
//! device status integration.

pub mod capture;
pub mod config;
pub mod device;
pub mod encoder;
pub mod recorder;
pub mod utils;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod test_support;

use capture::{FrameSource, LiveFrameSource};
use config::AppConfig;
use device::{DeviceReport, HttpDeviceClient, StatusPoller};
use encoder::{FfmpegBackend, FfmpegProbe};
use recorder::{DirectorySink, RecorderDeps, RecordingCoordinator, RecordingEvent, RecordingMode};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::error::AppResult;
use watchdog::StreamWatchdog;

/// How often liveness metrics are logged while running
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camview=debug,camview_lib=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connect to the camera and record until Ctrl-C or until `duration` elapses
pub async fn run(config: AppConfig, duration: Option<Duration>) -> AppResult<()> {
    tracing::info!("Starting camview v{}", env!("CARGO_PKG_VERSION"));

    let source = Arc::new(LiveFrameSource::new(&config.device, &config.stream)?);
    let watchdog = Arc::new(StreamWatchdog::new(source.clone(), &config.stream));
    let watchdog_task = watchdog.clone().spawn(source.subscribe());

    let device = Arc::new(HttpDeviceClient::new(&config.device)?);
    let poller = Arc::new(StatusPoller::new(device.clone(), config.device.status_interval()));
    let mut reports = poller.subscribe();
    let poller_task = poller.clone().spawn();

    let ffmpeg_path = config.recording.ffmpeg_path.clone();
    let probe = tokio::task::spawn_blocking(move || FfmpegProbe::detect(&ffmpeg_path))
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let mut coordinator = RecordingCoordinator::new(
        RecorderDeps {
            source: source.clone(),
            backend: Arc::new(FfmpegBackend::new(config.recording.ffmpeg_path.clone())),
            probe: Arc::new(probe),
            device,
            sink: Arc::new(DirectorySink::new(config.recording.output_dir.clone())),
        },
        config.recording.clone(),
    );
    coordinator.attach_reconnect_timer(watchdog.reconnect_timer());
    let mut events = coordinator.subscribe();
    let mut status = watchdog.subscribe();

    let mut frames = source.subscribe();
    source.connect();
    if config.recording.mode == RecordingMode::Local {
        // Local recordings take their geometry from the first decoded frame
        let timeout = config.stream.stall_timeout();
        if capture::wait_for_load(&mut frames, timeout).await {
            if let Some(geometry) = source.geometry() {
                tracing::info!("Live stream is {}", geometry);
            }
        } else {
            tracing::warn!(
                "No frame within {:?}, recording at the default size",
                timeout
            );
        }
    }
    drop(frames);
    coordinator.start(config.recording.mode).await?;

    let deadline = duration.map(|d| tokio::time::Instant::now() + d);
    let mut metrics_tick = tokio::time::interval(METRICS_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, stopping");
                break;
            }
            _ = until(deadline) => {
                tracing::info!("Duration reached, stopping");
                break;
            }
            Ok(report) = reports.recv() => match report {
                DeviceReport::Online(device_status) => coordinator.reconcile(&device_status),
                DeviceReport::Offline(_) => {}
            },
            Ok(stream_status) = status.recv() => {
                tracing::info!("Stream: {:?}", stream_status);
            }
            Ok(event) = events.recv() => log_event(&event),
            _ = metrics_tick.tick() => {
                let metrics = watchdog.metrics();
                tracing::info!(
                    "Liveness: fps={} dropped={}",
                    metrics.fps.map_or_else(|| "-".to_string(), |fps| format!("{:.1}", fps)),
                    metrics.dropped_frames
                );
            }
        }
    }

    match coordinator.stop().await {
        Ok(Some(path)) => tracing::info!("Recording saved to {:?}", path),
        Ok(None) => {}
        Err(err) => tracing::error!("Recording failed: {}", err),
    }
    coordinator.settle().await;
    while let Ok(event) = events.try_recv() {
        log_event(&event);
    }

    let report = coordinator.shutdown();
    tracing::debug!("Shutdown: {:?}", report);
    source.pause();
    poller_task.abort();
    watchdog_task.abort();
    Ok(())
}

async fn until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn log_event(event: &RecordingEvent) {
    match event {
        RecordingEvent::Started { mode } => tracing::info!("Recording started ({})", mode),
        RecordingEvent::Stopped { mode } => tracing::info!("Recording stopped ({})", mode),
        RecordingEvent::Saved {
            path,
            container,
            bytes,
        } => tracing::info!("Saved {} bytes of {} to {:?}", bytes, container, path),
        RecordingEvent::Notice(message) => tracing::info!("{}", message),
        RecordingEvent::Error(message) => tracing::error!("{}", message),
    }
}
