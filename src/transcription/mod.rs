//! # Transcription Module
//!
//! Speech-to-text for the pipeline's first stage and for reference transcripts.
//!
//! ## Key Components:
//! - **Transcriber**: the capability trait the pipeline depends on
//! - **TranscriptionEngine**: registry-backed adapter adding input checks and timing
//! - **WhisperModel**: Candle-rs Whisper backend (pure Rust, no whisper.cpp)
//! - **audio**: WAV / raw PCM decoding to 16kHz mono
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, good balance for development
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, good technical vocabulary
//! - **large**: ~1550MB, best accuracy but slowest
//! - **turbo**: ~809MB, default

pub mod audio;
pub mod engine;
pub mod model;

use std::path::Path;

pub use engine::{Transcript, TranscriptionEngine};
pub use model::{ModelSize, WhisperModel};

/// A loaded speech-to-text model.
///
/// Implementations are shared between concurrent pipeline runs and are
/// always called from the blocking pool.
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio file at `audio_path` to plain text.
    fn transcribe(&self, audio_path: &Path) -> anyhow::Result<String>;
}
