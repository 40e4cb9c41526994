//! Request-scoped staging of uploaded audio.
//!
//! Uploads are streamed into a private temp directory that is deleted when
//! the [`StagedUploads`] value is dropped, whichever way the request ends.

use crate::error::InputRole;
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("The {role} exceeds the {limit_mb} MB upload limit")]
    TooLarge { role: InputRole, limit_mb: usize },

    #[error("The {role} upload is empty")]
    Empty { role: InputRole },

    #[error("Reading the {role} upload failed: {message}")]
    Stream { role: InputRole, message: String },

    #[error("Staging I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Uploaded inputs for one invocation.
#[derive(Debug)]
pub struct StagedUploads {
    dir: tempfile::TempDir,
    source_audio: Option<PathBuf>,
    reference_audio: Option<PathBuf>,
    max_bytes: usize,
}

impl StagedUploads {
    /// Create an empty staging area under `root` (or the system temp dir).
    pub async fn new(root: Option<&Path>, max_bytes: usize) -> Result<Self, StageError> {
        if let Some(root) = root {
            tokio::fs::create_dir_all(root).await?;
        }
        let root = root.map(Path::to_path_buf);
        let dir = tokio::task::spawn_blocking(move || {
            let mut builder = tempfile::Builder::new();
            builder.prefix("voice-dub-upload-");
            match root {
                Some(root) => builder.tempdir_in(root),
                None => builder.tempdir(),
            }
        })
        .await
        .map_err(std::io::Error::other)??;

        Ok(Self {
            dir,
            source_audio: None,
            reference_audio: None,
            max_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_audio(&self) -> Option<&Path> {
        self.source_audio.as_deref()
    }

    pub fn reference_audio(&self) -> Option<&Path> {
        self.reference_audio.as_deref()
    }

    /// Stream one upload to disk. The original file extension is kept so the
    /// decoder can tell WAV from raw PCM.
    ///
    /// Staging the same role twice replaces the earlier file.
    pub async fn stage<S, B, E>(
        &mut self,
        role: InputRole,
        filename: Option<&str>,
        mut stream: S,
    ) -> Result<&Path, StageError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let stem = match role {
            InputRole::SourceAudio => "source_audio",
            InputRole::ReferenceAudio => "reference_audio",
        };
        let path = self.dir.path().join(format!("{}.{}", stem, safe_extension(filename)));

        let mut file = tokio::fs::File::create(&path).await?;
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StageError::Stream {
                role,
                message: e.to_string(),
            })?;
            let bytes = chunk.as_ref();
            written += bytes.len();
            if written > self.max_bytes {
                return Err(StageError::TooLarge {
                    role,
                    limit_mb: self.max_bytes / (1024 * 1024),
                });
            }
            file.write_all(bytes).await?;
        }
        file.flush().await?;

        if written == 0 {
            return Err(StageError::Empty { role });
        }

        tracing::debug!(role = %role, bytes = written, path = %path.display(), "Staged upload");
        let slot = match role {
            InputRole::SourceAudio => &mut self.source_audio,
            InputRole::ReferenceAudio => &mut self.reference_audio,
        };
        Ok(slot.insert(path).as_path())
    }
}

/// Lowercase alphanumeric extension of `filename`, or `wav`.
fn safe_extension(filename: Option<&str>) -> String {
    filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "wav".to_string())
}
