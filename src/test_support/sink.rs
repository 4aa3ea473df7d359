use crate::recorder::{ArtifactSink, RecordingArtifact};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;

/// Keeps delivered recordings in memory
#[derive(Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<RecordingArtifact>>,
}

impl MemorySink {
    pub fn delivered(&self) -> Vec<RecordingArtifact> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn deliver(&self, artifact: &RecordingArtifact) -> std::io::Result<PathBuf> {
        self.delivered.lock().push(artifact.clone());
        Ok(PathBuf::from(artifact.file_name()))
    }
}
