use crate::encoder::{
    CapabilityProbe, ContainerFormat, EncoderBackend, EncoderError, EncoderEvent, EncoderHandle,
    EncoderOptions, EncoderSlot, OpenedEncoder,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub fn empty_slot() -> EncoderSlot {
    Arc::new(Mutex::new(None))
}

pub fn slot_with(handle: FakeHandle) -> EncoderSlot {
    let handle: Box<dyn EncoderHandle> = Box::new(handle);
    Arc::new(Mutex::new(Some(handle)))
}

/// Counters shared by every handle a backend opens
#[derive(Clone, Default)]
pub struct HandleCounters {
    closes: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    pushed: Arc<Mutex<Vec<usize>>>,
}

impl HandleCounters {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn pushed_frames(&self) -> Vec<usize> {
        self.pushed.lock().clone()
    }
}

/// What a fake encoder does once its input is closed
#[derive(Debug, Clone)]
enum CloseBehavior {
    Finalize,
    Fatal(EncoderError),
    Silent,
}

/// Encoder handle that records pushed frame sizes and replays scripted
/// chunks on close
pub struct FakeHandle {
    container: ContainerFormat,
    /// Byte length of every accepted frame
    pub pushed: Arc<Mutex<Vec<usize>>>,
    counters: HandleCounters,
    closed: bool,
    events: Option<mpsc::UnboundedSender<EncoderEvent>>,
    chunks: Vec<Vec<u8>>,
    on_close: CloseBehavior,
}

impl FakeHandle {
    pub fn new(container: ContainerFormat) -> Self {
        let counters = HandleCounters::default();
        Self {
            container,
            pushed: counters.pushed.clone(),
            counters,
            closed: false,
            events: None,
            chunks: Vec::new(),
            on_close: CloseBehavior::Finalize,
        }
    }

    pub fn counters(&self) -> HandleCounters {
        self.counters.clone()
    }
}

impl EncoderHandle for FakeHandle {
    fn container(&self) -> ContainerFormat {
        self.container
    }

    fn push_frame(&mut self, frame: &[u8]) -> Result<(), EncoderError> {
        if self.closed {
            return Err(EncoderError::Closed);
        }
        self.pushed.lock().push(frame.len());
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.counters.closes.fetch_add(1, Ordering::SeqCst);

        if let Some(events) = &self.events {
            for chunk in self.chunks.drain(..) {
                let _ = events.send(EncoderEvent::Chunk(chunk));
            }
            match &self.on_close {
                CloseBehavior::Finalize => {
                    let _ = events.send(EncoderEvent::Finalized);
                }
                CloseBehavior::Fatal(err) => {
                    let _ = events.send(EncoderEvent::Fatal(err.clone()));
                }
                CloseBehavior::Silent => return,
            }
        }
        self.events = None;
    }

    fn is_active(&self) -> bool {
        !self.closed
    }

    fn release(&mut self) {
        self.closed = true;
        self.events = None;
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scriptable encoder backend
pub struct FakeBackend {
    failing: Vec<Option<ContainerFormat>>,
    chunks: Vec<Vec<u8>>,
    on_close: CloseBehavior,
    attempts: Mutex<Vec<Option<ContainerFormat>>>,
    last_options: Mutex<Option<EncoderOptions>>,
    counters: HandleCounters,
    /// Event stream of the most recently opened handle
    latest: Mutex<Option<mpsc::WeakUnboundedSender<EncoderEvent>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            failing: Vec::new(),
            chunks: Vec::new(),
            on_close: CloseBehavior::Finalize,
            attempts: Mutex::new(Vec::new()),
            last_options: Mutex::new(None),
            counters: HandleCounters::default(),
            latest: Mutex::new(None),
        }
    }

    /// Make the open encoder fail while it is still running.
    /// Returns false when no encoder is listening.
    pub fn fail_running(&self, err: EncoderError) -> bool {
        let events = self.latest.lock().as_ref().and_then(|weak| weak.upgrade());
        events.map_or(false, |events| events.send(EncoderEvent::Fatal(err)).is_ok())
    }

    /// Fail construction for this codec request (`None` = default codec)
    pub fn failing(mut self, format: Option<ContainerFormat>) -> Self {
        self.failing.push(format);
        self
    }

    /// Chunks emitted, in order, when the encoder is closed
    pub fn with_chunks(mut self, chunks: Vec<Vec<u8>>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn fatal_on_close(mut self, err: EncoderError) -> Self {
        self.on_close = CloseBehavior::Fatal(err);
        self
    }

    /// Never finalize after close
    pub fn silent_on_close(mut self) -> Self {
        self.on_close = CloseBehavior::Silent;
        self
    }

    pub fn attempts(&self) -> Vec<Option<ContainerFormat>> {
        self.attempts.lock().clone()
    }

    pub fn last_options(&self) -> Option<EncoderOptions> {
        *self.last_options.lock()
    }

    pub fn closes(&self) -> usize {
        self.counters.closes()
    }

    pub fn releases(&self) -> usize {
        self.counters.releases()
    }

    pub fn pushed_frames(&self) -> Vec<usize> {
        self.counters.pushed_frames()
    }
}

impl EncoderBackend for FakeBackend {
    fn open(
        &self,
        format: Option<ContainerFormat>,
        options: &EncoderOptions,
    ) -> Result<OpenedEncoder, EncoderError> {
        self.attempts.lock().push(format);
        *self.last_options.lock() = Some(*options);

        if self.failing.contains(&format) {
            return Err(EncoderError::Unsupported(format!("{:?} unavailable", format)));
        }

        let (events_tx, events) = mpsc::unbounded_channel();
        *self.latest.lock() = Some(events_tx.downgrade());
        let handle = FakeHandle {
            container: format.unwrap_or(ContainerFormat::WebmDefault),
            pushed: self.counters.pushed.clone(),
            counters: self.counters.clone(),
            closed: false,
            events: Some(events_tx),
            chunks: self.chunks.clone(),
            on_close: self.on_close.clone(),
        };

        Ok(OpenedEncoder {
            handle: Box::new(handle),
            events,
        })
    }
}

/// Capability probe with a fixed answer
pub struct FixedProbe {
    supported: Vec<ContainerFormat>,
}

impl FixedProbe {
    pub fn all() -> Self {
        Self {
            supported: vec![ContainerFormat::Mp4, ContainerFormat::WebmVp9],
        }
    }

    pub fn only(supported: Vec<ContainerFormat>) -> Self {
        Self { supported }
    }
}

impl CapabilityProbe for FixedProbe {
    fn supports(&self, format: ContainerFormat) -> bool {
        format == ContainerFormat::WebmDefault || self.supported.contains(&format)
    }
}
