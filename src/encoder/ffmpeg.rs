//! FFmpeg recording encoder
//!
//! Raw RGBA frames go in on stdin; a fragmented, streamable container comes
//! out on stdout. Output is flushed as a chunk on a fixed interval so an
//! early stop still leaves a playable partial file.

use super::types::{
    ContainerFormat, EncoderBackend, EncoderError, EncoderEvent, EncoderHandle, EncoderOptions,
    OpenedEncoder,
};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Frames queued for the encoder before new ones are dropped
const FRAME_QUEUE: usize = 8;

const READ_BUFFER: usize = 64 * 1024;

/// Encoder backend that runs an ffmpeg process per recording
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg_path: String,
}

impl FfmpegBackend {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Build the ffmpeg argument list for a recording
    pub fn build_args(
        format: Option<ContainerFormat>,
        options: &EncoderOptions,
    ) -> Result<Vec<String>, EncoderError> {
        let resolution = options.resolution;
        if resolution.is_empty() {
            return Err(EncoderError::Unsupported(format!(
                "empty frame size {}",
                resolution
            )));
        }

        let flush_ms = options.chunk_interval.as_millis().max(1);

        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "warning".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgba".into(),
            "-s".into(),
            resolution.to_string(),
            "-r".into(),
            options.fps.max(1).to_string(),
            "-i".into(),
            "pipe:0".into(),
            "-an".into(),
        ];

        match format {
            Some(ContainerFormat::Mp4) => {
                // yuv420p needs even dimensions
                if resolution.width % 2 != 0 || resolution.height % 2 != 0 {
                    return Err(EncoderError::Unsupported(format!(
                        "H.264 requires even dimensions, got {}",
                        resolution
                    )));
                }
                args.extend([
                    "-c:v".into(),
                    "libx264".into(),
                    "-preset".into(),
                    "ultrafast".into(),
                    "-tune".into(),
                    "zerolatency".into(),
                    "-pix_fmt".into(),
                    "yuv420p".into(),
                    "-movflags".into(),
                    "frag_keyframe+empty_moov+default_base_moof".into(),
                    "-frag_duration".into(),
                    (flush_ms * 1000).to_string(),
                    "-f".into(),
                    "mp4".into(),
                ]);
            }
            Some(ContainerFormat::WebmVp9) => {
                args.extend([
                    "-c:v".into(),
                    "libvpx-vp9".into(),
                    "-deadline".into(),
                    "realtime".into(),
                    "-cpu-used".into(),
                    "8".into(),
                    "-b:v".into(),
                    "0".into(),
                    "-crf".into(),
                    "32".into(),
                    "-cluster_time_limit".into(),
                    flush_ms.to_string(),
                    "-f".into(),
                    "webm".into(),
                ]);
            }
            Some(ContainerFormat::WebmDefault) | None => {
                args.extend([
                    "-cluster_time_limit".into(),
                    flush_ms.to_string(),
                    "-f".into(),
                    "webm".into(),
                ]);
            }
        }

        args.extend(["-flush_packets".into(), "1".into(), "pipe:1".into()]);
        Ok(args)
    }
}

impl EncoderBackend for FfmpegBackend {
    fn open(
        &self,
        format: Option<ContainerFormat>,
        options: &EncoderOptions,
    ) -> Result<OpenedEncoder, EncoderError> {
        let args = Self::build_args(format, options)?;
        tracing::info!("Starting FFmpeg recorder: {:?}", args);

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EncoderError::Spawn(format!("{}: {}", self.ffmpeg_path, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Spawn("Failed to capture FFmpeg stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EncoderError::Spawn("Failed to capture FFmpeg stdout".to_string()))?;
        let stderr = child.stderr.take();

        let (event_tx, events) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let running = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(write_frames(stdin, frame_rx));
        let logger = stderr.map(|stderr| tokio::spawn(log_stderr(stderr)));
        let reader = tokio::spawn(pump_output(
            child,
            stdout,
            options.chunk_interval,
            event_tx,
            running.clone(),
        ));

        let handle = FfmpegHandle {
            container: format.unwrap_or(ContainerFormat::WebmDefault),
            frames: Some(frame_tx),
            frame_len: options.resolution.rgba_len(),
            running,
            tasks: [Some(writer), Some(reader), logger],
        };

        Ok(OpenedEncoder {
            handle: Box::new(handle),
            events,
        })
    }
}

/// Handle to a running ffmpeg recorder
pub struct FfmpegHandle {
    container: ContainerFormat,
    frames: Option<mpsc::Sender<Vec<u8>>>,
    frame_len: usize,
    running: Arc<AtomicBool>,
    tasks: [Option<JoinHandle<()>>; 3],
}

impl EncoderHandle for FfmpegHandle {
    fn container(&self) -> ContainerFormat {
        self.container
    }

    fn push_frame(&mut self, frame: &[u8]) -> Result<(), EncoderError> {
        if frame.len() != self.frame_len {
            return Err(EncoderError::Unsupported(format!(
                "frame is {} bytes, expected {}",
                frame.len(),
                self.frame_len
            )));
        }

        let frames = self.frames.as_ref().ok_or(EncoderError::Closed)?;
        match frames.try_send(frame.to_vec()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!("Encoder busy, dropping frame");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EncoderError::Closed),
        }
    }

    fn close(&mut self) {
        // Dropping the sender ends the writer, which closes ffmpeg's stdin
        if self.frames.take().is_some() {
            tracing::debug!("Closing FFmpeg input");
        }
    }

    fn is_active(&self) -> bool {
        self.frames.is_some() && self.running.load(Ordering::SeqCst)
    }

    fn release(&mut self) {
        self.close();
        // Aborting the reader drops the child, which kills ffmpeg if it is still running
        for task in self.tasks.iter_mut().filter_map(Option::take) {
            task.abort();
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for FfmpegHandle {
    fn drop(&mut self) {
        self.release();
    }
}

async fn write_frames(mut stdin: ChildStdin, mut frames: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = frames.recv().await {
        if let Err(err) = stdin.write_all(&frame).await {
            tracing::warn!("Failed to write frame to FFmpeg: {}", err);
            break;
        }
    }
    let _ = stdin.shutdown().await;
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            tracing::debug!("FFmpeg: {}", line.trim());
        }
    }
}

async fn pump_output(
    mut child: Child,
    mut stdout: ChildStdout,
    chunk_interval: Duration,
    events: mpsc::UnboundedSender<EncoderEvent>,
    running: Arc<AtomicBool>,
) {
    let mut pending = Vec::new();
    let mut buf = vec![0u8; READ_BUFFER];
    let mut flush = tokio::time::interval(chunk_interval);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
    flush.tick().await;

    loop {
        tokio::select! {
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => pending.extend_from_slice(&buf[..n]),
                Err(err) => {
                    running.store(false, Ordering::SeqCst);
                    let _ = events.send(EncoderEvent::Fatal(EncoderError::Io(err.to_string())));
                    return;
                }
            },
            _ = flush.tick() => {
                if !pending.is_empty() {
                    let _ = events.send(EncoderEvent::Chunk(std::mem::take(&mut pending)));
                }
            }
        }
    }

    if !pending.is_empty() {
        let _ = events.send(EncoderEvent::Chunk(pending));
    }

    let outcome = match child.wait().await {
        Ok(status) if status.success() => EncoderEvent::Finalized,
        Ok(status) => EncoderEvent::Fatal(EncoderError::Process(format!(
            "ffmpeg exited with {}",
            status
        ))),
        Err(err) => EncoderEvent::Fatal(EncoderError::Io(err.to_string())),
    };
    running.store(false, Ordering::SeqCst);
    let _ = events.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Resolution;

    fn options(width: u32, height: u32) -> EncoderOptions {
        EncoderOptions {
            resolution: Resolution::new(width, height),
            fps: 20,
            chunk_interval: Duration::from_millis(1000),
        }
    }

    #[test]
    fn test_mp4_args_are_fragmented() {
        let args = FfmpegBackend::build_args(Some(ContainerFormat::Mp4), &options(640, 480)).unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-s 640x480"));
        assert!(joined.contains("-r 20"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("frag_keyframe+empty_moov"));
        assert!(joined.contains("-frag_duration 1000000"));
        assert!(joined.ends_with("-f mp4 -flush_packets 1 pipe:1"));
    }

    #[test]
    fn test_vp9_args() {
        let args = FfmpegBackend::build_args(Some(ContainerFormat::WebmVp9), &options(640, 480)).unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libvpx-vp9"));
        assert!(joined.contains("-cluster_time_limit 1000"));
        assert!(joined.contains("-f webm"));
    }

    #[test]
    fn test_default_args_have_no_explicit_codec() {
        let args = FfmpegBackend::build_args(None, &options(641, 481)).unwrap();
        assert!(!args.iter().any(|arg| arg == "-c:v"));
        assert!(args.join(" ").contains("-f webm"));
    }

    #[test]
    fn test_mp4_rejects_odd_dimensions() {
        let err = FfmpegBackend::build_args(Some(ContainerFormat::Mp4), &options(641, 480)).unwrap_err();
        assert!(matches!(err, EncoderError::Unsupported(_)));
    }

    #[test]
    fn test_rejects_empty_resolution() {
        assert!(FfmpegBackend::build_args(None, &options(0, 480)).is_err());
    }

    /// Stand-in for the ffmpeg binary that ignores its arguments
    #[cfg(unix)]
    fn fake_ffmpeg(dir: &std::path::Path, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<EncoderEvent>) -> EncoderEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_flushed_per_interval_and_at_exit() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FfmpegBackend::new(fake_ffmpeg(
            dir.path(),
            "printf AAA\nsleep 0.5\nprintf BBB\ncat > /dev/null\nprintf CCC",
        ));
        let options = EncoderOptions {
            chunk_interval: Duration::from_millis(100),
            ..options(64, 48)
        };
        let OpenedEncoder {
            mut handle,
            mut events,
        } = backend.open(None, &options).unwrap();
        assert_eq!(handle.container(), ContainerFormat::WebmDefault);

        assert_eq!(next_event(&mut events).await, EncoderEvent::Chunk(b"AAA".to_vec()));
        assert_eq!(next_event(&mut events).await, EncoderEvent::Chunk(b"BBB".to_vec()));
        assert!(handle.is_active());

        // Closing stdin lets the process write its trailer and exit
        handle.close();
        assert_eq!(next_event(&mut events).await, EncoderEvent::Chunk(b"CCC".to_vec()));
        assert_eq!(next_event(&mut events).await, EncoderEvent::Finalized);
        assert!(!handle.is_active());
        handle.release();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FfmpegBackend::new(fake_ffmpeg(dir.path(), "printf PARTIAL\nexit 3"));
        let OpenedEncoder {
            mut handle,
            mut events,
        } = backend.open(None, &options(64, 48)).unwrap();

        assert_eq!(next_event(&mut events).await, EncoderEvent::Chunk(b"PARTIAL".to_vec()));
        match next_event(&mut events).await {
            EncoderEvent::Fatal(EncoderError::Process(message)) => assert!(message.contains('3')),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!handle.is_active());
        handle.release();
    }

    #[tokio::test]
    async fn test_missing_binary_fails_construction() {
        let backend = FfmpegBackend::new("/nonexistent/ffmpeg-binary");
        let result = backend.open(Some(ContainerFormat::Mp4), &options(640, 480));
        assert!(matches!(result, Err(EncoderError::Spawn(_))));
    }
}
