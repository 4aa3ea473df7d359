//! Recording delivery
//!
//! Hands a finished recording to the user. The default sink writes it into
//! a directory under its synthesized file name.

use super::state::RecordingArtifact;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Destination for finished recordings
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Store the artifact and return where it went
    async fn deliver(&self, artifact: &RecordingArtifact) -> std::io::Result<PathBuf>;
}

/// Writes recordings into a directory, creating it on demand
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn deliver(&self, artifact: &RecordingArtifact) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(artifact.file_name());
        tokio::fs::write(&path, &artifact.bytes).await?;
        tracing::info!(
            "Saved {} bytes of {} to {:?}",
            artifact.len(),
            artifact.mime_type(),
            path
        );
        Ok(path)
    }
}
