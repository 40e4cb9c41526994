//! Per-invocation output directories.
//!
//! Each synthesis gets `<root>/<uuid>/<file_name>`. The directory name is the
//! artifact id, so concurrent runs never share a path.

use crate::error::PipelineError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct OutputArtifact {
    pub id: Uuid,
    pub directory: PathBuf,
    pub audio_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    file_name: String,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            file_name: file_name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh artifact directory.
    pub async fn allocate(&self) -> Result<OutputArtifact, PipelineError> {
        let id = Uuid::new_v4();
        let directory = self.root.join(id.to_string());
        tokio::fs::create_dir_all(&directory).await.map_err(|e| {
            PipelineError::Unexpected(format!(
                "creating output directory {}: {}",
                directory.display(),
                e
            ))
        })?;

        Ok(OutputArtifact {
            id,
            audio_path: directory.join(&self.file_name),
            directory,
        })
    }

    /// Remove an artifact directory that never received its audio.
    pub async fn discard(&self, artifact: &OutputArtifact) {
        if let Err(e) = tokio::fs::remove_dir_all(&artifact.directory).await {
            tracing::warn!(
                artifact_id = %artifact.id,
                error = %e,
                "Could not remove unused artifact directory"
            );
        }
    }

    /// Path of the generated audio for `id`, if it exists.
    ///
    /// Anything that isn't a uuid resolves to `None`, so ids can't escape the root.
    pub async fn resolve(&self, id: &str) -> Option<PathBuf> {
        let id = Uuid::parse_str(id).ok()?;
        let path = self.root.join(id.to_string()).join(&self.file_name);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => None,
        }
    }
}
