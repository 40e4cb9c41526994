//! # Capability Registries
//!
//! Builds the three model registries once at startup and wires each to its
//! concrete backend. Everything downstream only sees the capability traits.

use crate::config::AppConfig;
use crate::device::{load_with_fallback, DevicePreference};
use crate::error::{Capability, PipelineError};
use crate::registry::{EntrySnapshot, ModelRegistry};
use crate::synthesis::router::SynthesizerRegistry;
use crate::synthesis::{F5CliSynthesizer, VoiceProfile, VoiceSynthesizer};
use crate::transcription::engine::TranscriberRegistry;
use crate::transcription::{ModelSize, Transcriber, WhisperModel};
use crate::translation::engine::TranslatorRegistry;
use crate::translation::{MadladTranslator, Translator};
use anyhow::anyhow;
use std::sync::Arc;

/// A registry key for any capability, parsed from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelKey {
    Transcription(ModelSize),
    Translation(String),
    Synthesis(VoiceProfile),
}

impl ModelKey {
    pub fn parse(capability: Capability, key: &str) -> Result<Self, String> {
        match capability {
            Capability::Transcription => key.parse().map(ModelKey::Transcription),
            Capability::Translation if key.trim().is_empty() => {
                Err("Translation model key cannot be empty".to_string())
            }
            Capability::Translation => Ok(ModelKey::Translation(key.trim().to_string())),
            Capability::Synthesis => key.parse().map(ModelKey::Synthesis),
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            ModelKey::Transcription(_) => Capability::Transcription,
            ModelKey::Translation(_) => Capability::Translation,
            ModelKey::Synthesis(_) => Capability::Synthesis,
        }
    }
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKey::Transcription(size) => write!(f, "{}", size),
            ModelKey::Translation(repo) => write!(f, "{}", repo),
            ModelKey::Synthesis(profile) => write!(f, "{}", profile),
        }
    }
}

/// The three registries, shared by the orchestrator and the model endpoints.
#[derive(Clone)]
pub struct ModelRegistries {
    pub transcription: Arc<TranscriberRegistry>,
    pub translation: Arc<TranslatorRegistry>,
    pub synthesis: Arc<SynthesizerRegistry>,
}

impl ModelRegistries {
    pub fn new(
        transcription: TranscriberRegistry,
        translation: TranslatorRegistry,
        synthesis: SynthesizerRegistry,
    ) -> Self {
        Self {
            transcription: Arc::new(transcription),
            translation: Arc::new(translation),
            synthesis: Arc::new(synthesis),
        }
    }

    /// Registries backed by Whisper, MADLAD-400 and the F5-TTS tool.
    ///
    /// Nothing is loaded here; each backend loads on first use or on preload.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let device: DevicePreference = config.models.device.parse().map_err(|e: String| anyhow!(e))?;

        let transcription = ModelRegistry::with_loader(Capability::Transcription, move |size: &ModelSize| {
            let size = *size;
            let model = load_with_fallback(device, |d| WhisperModel::load(size, d))?;
            Ok(Arc::new(model) as Arc<dyn Transcriber>)
        });

        let weights = config.models.translation_weights.clone();
        let translation = ModelRegistry::with_loader(Capability::Translation, move |repo: &String| {
            let model = MadladTranslator::load(repo, &weights)?;
            Ok(Arc::new(model) as Arc<dyn Translator>)
        });

        let synthesis_config = config.synthesis.clone();
        let synthesis = ModelRegistry::with_loader(Capability::Synthesis, move |profile: &VoiceProfile| {
            let synthesizer = F5CliSynthesizer::load(&synthesis_config, *profile)?;
            Ok(Arc::new(synthesizer) as Arc<dyn VoiceSynthesizer>)
        });

        Ok(Self::new(transcription, translation, synthesis))
    }

    /// Load `key` now, replacing any cached handle.
    pub async fn force_load(&self, key: &ModelKey) -> Result<(), PipelineError> {
        match key {
            ModelKey::Transcription(size) => self.transcription.force_load(size).await.map(|_| ()),
            ModelKey::Translation(repo) => self.translation.force_load(repo).await.map(|_| ()),
            ModelKey::Synthesis(profile) => self.synthesis.force_load(profile).await.map(|_| ()),
        }
    }

    /// Drop the cached handle for `key`. Returns whether one was cached.
    pub async fn invalidate(&self, key: &ModelKey) -> bool {
        match key {
            ModelKey::Transcription(size) => self.transcription.invalidate(size).await,
            ModelKey::Translation(repo) => self.translation.invalidate(repo).await,
            ModelKey::Synthesis(profile) => self.synthesis.invalidate(profile).await,
        }
    }

    /// Status of every entry across all capabilities.
    pub async fn snapshot(&self) -> Vec<EntrySnapshot> {
        let mut entries = self.transcription.snapshot().await;
        entries.extend(self.translation.snapshot().await);
        entries.extend(self.synthesis.snapshot().await);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockSynthesizer, MockTranscriber, MockTranslator};

    #[test]
    fn test_model_key_parsing() {
        assert_eq!(
            ModelKey::parse(Capability::Transcription, "turbo").unwrap(),
            ModelKey::Transcription(ModelSize::Turbo)
        );
        assert_eq!(
            ModelKey::parse(Capability::Synthesis, "F5TTS_Spanish").unwrap(),
            ModelKey::Synthesis(VoiceProfile::Spanish)
        );
        assert_eq!(
            ModelKey::parse(Capability::Translation, "jbochi/madlad400-3b-mt").unwrap().to_string(),
            "jbochi/madlad400-3b-mt"
        );
        assert!(ModelKey::parse(Capability::Transcription, "huge").is_err());
        assert!(ModelKey::parse(Capability::Translation, " ").is_err());
    }

    #[tokio::test]
    async fn test_force_load_and_invalidate_by_key() {
        let transcriber = Arc::new(MockTranscriber::with_default(""));
        let translator = Arc::new(MockTranslator::new());
        let synthesizer = Arc::new(MockSynthesizer::new());
        let registries = ModelRegistries::new(
            transcriber.registry(),
            translator.registry(),
            synthesizer.registry(),
        );

        let key = ModelKey::Synthesis(VoiceProfile::Base);
        registries.force_load(&key).await.unwrap();
        assert_eq!(synthesizer.loads_for(VoiceProfile::Base), 1);

        let snapshot = registries.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].capability, Capability::Synthesis);
        assert_eq!(snapshot[0].key, "base");

        assert!(registries.invalidate(&key).await);
        assert!(!registries.invalidate(&key).await);
    }

    #[test]
    fn test_from_config_rejects_bad_device() {
        let mut config = AppConfig::default();
        config.models.device = "tpu".to_string();
        assert!(ModelRegistries::from_config(&config).is_err());
        assert!(ModelRegistries::from_config(&AppConfig::default()).is_ok());
    }
}
