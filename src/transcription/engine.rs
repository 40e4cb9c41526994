//! # Transcription Engine
//!
//! Adapter between the pipeline and whichever [`Transcriber`] the registry
//! holds for the configured model size.
//!
//! ## Key Responsibilities:
//! - **Input check**: a missing file fails with `MissingInput` before any model is touched
//! - **Lazy load**: the first call for a size loads it through the registry
//! - **Off-loop inference**: decoding runs on the blocking pool
//! - **Timing**: wall-clock duration including a lazy load, if one happened

use crate::error::{InputRole, PipelineError};
use crate::registry::ModelRegistry;
use crate::transcription::{ModelSize, Transcriber};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Registry of loaded Whisper handles, one per model size.
pub type TranscriberRegistry = ModelRegistry<ModelSize, dyn Transcriber>;

/// Result of a transcription.
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub text: String,
    #[serde(rename = "duration_seconds", serialize_with = "serialize_seconds")]
    pub duration: Duration,
}

fn serialize_seconds<S: serde::Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(duration.as_secs_f64())
}

/// Fail with `MissingInput` unless `path` exists.
pub async fn ensure_input_exists(path: &Path, role: InputRole) -> Result<(), PipelineError> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(PipelineError::MissingInput {
            role,
            location: path.display().to_string(),
        }),
        Err(err) => Err(PipelineError::Unexpected(format!(
            "could not check {} at {}: {}",
            role,
            path.display(),
            err
        ))),
    }
}

/// High-level transcription engine for one configured model size.
pub struct TranscriptionEngine {
    registry: Arc<TranscriberRegistry>,
    model_size: ModelSize,
}

impl TranscriptionEngine {
    pub fn new(registry: Arc<TranscriberRegistry>, model_size: ModelSize) -> Self {
        Self {
            registry,
            model_size,
        }
    }

    pub fn model_size(&self) -> ModelSize {
        self.model_size
    }

    pub fn registry(&self) -> &Arc<TranscriberRegistry> {
        &self.registry
    }

    /// Transcribe the audio at `audio_path`.
    ///
    /// ## Parameters:
    /// - **audio_path**: file to transcribe
    /// - **role**: which pipeline input this is, used in the `MissingInput` message
    ///
    /// ## Returns:
    /// - **Ok(Transcript)**: text plus elapsed time
    /// - **Err(MissingInput)**: the file does not exist (no model call made)
    /// - **Err(CapabilityLoad)**: the model could not be loaded
    /// - **Err(Transcription)**: the model failed on this input
    pub async fn transcribe(&self, audio_path: &Path, role: InputRole) -> Result<Transcript, PipelineError> {
        ensure_input_exists(audio_path, role).await?;

        let start_time = Instant::now();
        let model = self.registry.get(&self.model_size).await?;

        let owned_path = audio_path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || model.transcribe(&owned_path))
            .await
            .map_err(PipelineError::worker)?
            .map_err(PipelineError::Transcription)?;

        let duration = start_time.elapsed();
        tracing::info!(
            model = %self.model_size,
            input = %role,
            seconds = duration.as_secs_f64(),
            chars = text.len(),
            "Transcription complete"
        );

        Ok(Transcript { text, duration })
    }
}
