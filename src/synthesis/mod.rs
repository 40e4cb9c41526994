//! # Voice Synthesis Module
//!
//! Voice-cloned text-to-speech for the pipeline's last stage.
//!
//! ## Key Components:
//! - **VoiceSynthesizer**: capability trait, one loaded model per voice profile
//! - **VoiceProfile**: registry key; Spanish output gets a fine-tuned model
//! - **SynthesisRouter**: picks the profile for a target language and runs inference
//! - **F5CliSynthesizer**: backend driving the F5-TTS command-line tool

pub mod f5;
pub mod router;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub use f5::F5CliSynthesizer;
pub use router::SynthesisRouter;

/// A loaded voice-cloning model.
pub trait VoiceSynthesizer: Send + Sync {
    /// Speak `gen_text` in the voice of `ref_audio` and write a WAV to `output_path`.
    ///
    /// `ref_text` is the transcript of `ref_audio`.
    fn infer(&self, ref_audio: &Path, ref_text: &str, gen_text: &str, output_path: &Path) -> anyhow::Result<()>;
}

/// Which synthesis model to use. Each profile is loaded once and kept resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceProfile {
    /// Fine-tuned for Spanish output
    Spanish,
    /// Multilingual base model for every other language
    Base,
}

impl VoiceProfile {
    pub const ALL: [VoiceProfile; 2] = [VoiceProfile::Spanish, VoiceProfile::Base];

    /// Name reported in pipeline results.
    pub fn model_name(&self) -> &'static str {
        match self {
            VoiceProfile::Spanish => "F5TTS_Spanish",
            VoiceProfile::Base => "F5TTS_Base",
        }
    }
}

impl fmt::Display for VoiceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceProfile::Spanish => write!(f, "spanish"),
            VoiceProfile::Base => write!(f, "base"),
        }
    }
}

impl std::str::FromStr for VoiceProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spanish" | "es" | "f5tts_spanish" => Ok(VoiceProfile::Spanish),
            "base" | "f5tts_base" => Ok(VoiceProfile::Base),
            _ => Err(format!("Unknown voice profile: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_parsing() {
        assert_eq!("F5TTS_Spanish".parse::<VoiceProfile>().unwrap(), VoiceProfile::Spanish);
        assert_eq!("base".parse::<VoiceProfile>().unwrap(), VoiceProfile::Base);
        assert!("klingon".parse::<VoiceProfile>().is_err());
        for profile in VoiceProfile::ALL {
            assert_eq!(profile.to_string().parse::<VoiceProfile>().unwrap(), profile);
        }
    }
}
