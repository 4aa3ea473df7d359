//! Recording system module
//!
//! This module implements the recording lifecycle:
//! - RecordingCoordinator, the start/stop state machine for local and remote recording
//! - ResourceReaper, idempotent teardown of everything a recording holds
//! - ArtifactSink for handing finished recordings to the user

pub mod coordinator;
pub mod delivery;
pub mod reaper;
pub mod state;

pub use coordinator::{RecorderDeps, RecordingCoordinator};
pub use delivery::{ArtifactSink, DirectorySink};
pub use reaper::{ReapReport, ResourceReaper};
pub use state::{
    RecordingArtifact, RecordingError, RecordingEvent, RecordingMode, RecordingResult,
    RecordingSession, RecordingState, SessionInfo,
};
