//! # Synthesis Router
//!
//! Maps a target language to a voice profile and drives the cached
//! synthesizer for that profile.
//!
//! ## Routing Rule:
//! - `"es"` → [`VoiceProfile::Spanish`]
//! - anything else → [`VoiceProfile::Base`]

use crate::error::PipelineError;
use crate::registry::ModelRegistry;
use crate::synthesis::{VoiceProfile, VoiceSynthesizer};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Registry of synthesizers, one per voice profile.
pub type SynthesizerRegistry = ModelRegistry<VoiceProfile, dyn VoiceSynthesizer>;

pub struct SynthesisRouter {
    registry: Arc<SynthesizerRegistry>,
}

impl SynthesisRouter {
    pub fn new(registry: Arc<SynthesizerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SynthesizerRegistry> {
        &self.registry
    }

    /// Choose the voice profile for `target_lang`. Only the exact code `"es"`
    /// gets the Spanish voice.
    pub fn select(target_lang: &str) -> VoiceProfile {
        if target_lang == "es" {
            VoiceProfile::Spanish
        } else {
            VoiceProfile::Base
        }
    }

    /// Synthesize `text` with `profile`, writing the audio to `output_path`.
    ///
    /// ## Returns:
    /// Wall-clock time of the stage, including a lazy model load.
    pub async fn synthesize(
        &self,
        profile: VoiceProfile,
        reference_audio: &Path,
        reference_text: &str,
        text: &str,
        output_path: &Path,
    ) -> Result<Duration, PipelineError> {
        let start_time = Instant::now();
        let synthesizer = self.registry.get(&profile).await?;

        let ref_audio = reference_audio.to_path_buf();
        let ref_text = reference_text.to_string();
        let gen_text = text.to_string();
        let out_path = output_path.to_path_buf();
        tokio::task::spawn_blocking(move || synthesizer.infer(&ref_audio, &ref_text, &gen_text, &out_path))
            .await
            .map_err(PipelineError::worker)?
            .map_err(PipelineError::Synthesis)?;

        let duration = start_time.elapsed();
        tracing::info!(
            profile = %profile,
            model = profile.model_name(),
            output = %output_path.display(),
            seconds = duration.as_secs_f64(),
            "Speech synthesis complete"
        );
        Ok(duration)
    }
}
