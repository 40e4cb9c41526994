//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (APP_SERVER__PORT, APP_PIPELINE__OUTPUT_DIR, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore because many keys
//! (`output_dir`, `whisper_model`) contain single underscores themselves.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - `server`: where the HTTP API listens
/// - `models`: transcription and translation backends
/// - `synthesis`: the voice-cloning tool and its per-language profiles
/// - `pipeline`: artifact locations and reference-text policy
/// - `performance`: concurrency and upload limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub synthesis: SynthesisConfig,
    pub pipeline: PipelineConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Transcription and translation model settings.
///
/// ## Fields:
/// - `whisper_model`: Whisper size ("tiny", "base", "small", "medium", "large", "turbo")
/// - `device`: "auto", "cpu", "cuda" or "metal"
/// - `translation_model`: Hugging Face repo of the quantized MADLAD-400 model
/// - `translation_weights`: gguf file inside that repo
/// - `preload_on_startup`: force-load every capability before accepting requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub whisper_model: String,
    pub device: String,
    pub translation_model: String,
    pub translation_weights: String,
    pub preload_on_startup: bool,
}

/// One voice-cloning profile: which F5-TTS model to run and, for fine-tuned
/// models, where the checkpoint and vocabulary live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceProfileConfig {
    pub model: String,
    pub ckpt_file: Option<PathBuf>,
    pub vocab_file: Option<PathBuf>,
}

/// Voice synthesis settings.
///
/// `spanish` is used when the target language is "es"; every other target
/// language uses `base`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Executable name or path of the inference CLI
    pub command: String,
    /// Optional speaking-rate multiplier passed through to the CLI
    pub speed: Option<f32>,
    pub spanish: VoiceProfileConfig,
    pub base: VoiceProfileConfig,
}

/// How the transcript of the voice reference is obtained when the request
/// doesn't provide one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMode {
    /// Run the reference audio through the transcriber
    Transcribe,
    /// Use `pipeline.placeholder_reference_text`
    Placeholder,
}

impl std::fmt::Display for ReferenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceMode::Transcribe => write!(f, "transcribe"),
            ReferenceMode::Placeholder => write!(f, "placeholder"),
        }
    }
}

impl std::str::FromStr for ReferenceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "transcribe" => Ok(ReferenceMode::Transcribe),
            "placeholder" => Ok(ReferenceMode::Placeholder),
            _ => Err(format!("Unknown reference mode: {}", s)),
        }
    }
}

/// Pipeline artifact and reference-text settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root under which one uuid directory per synthesis is created
    pub output_dir: PathBuf,
    /// File name of the generated audio inside each artifact directory
    pub output_file_name: String,
    /// Where uploads are staged. Defaults to the system temp dir.
    pub staging_dir: Option<PathBuf>,
    /// Reference-text policy for the path-based entry point
    pub reference_mode: ReferenceMode,
    /// Reference-text policy for the upload entry point
    pub upload_reference_mode: ReferenceMode,
    pub placeholder_reference_text: String,
}

/// Performance tuning configuration.
///
/// ## Fields:
/// - `max_concurrent_pipelines`: pipelines allowed to run at once; extra requests wait
/// - `max_upload_mb`: per-file limit for multipart uploads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_pipelines: usize,
    pub max_upload_mb: usize,
}

impl PerformanceConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

/// Default reference transcript used when the reference audio is not transcribed.
pub const DEFAULT_PLACEHOLDER_REFERENCE_TEXT: &str =
    "Hola, esta es una muestra de mi voz para la clonación.";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            models: ModelsConfig {
                whisper_model: "turbo".to_string(),
                device: "auto".to_string(),
                translation_model: "jbochi/madlad400-3b-mt".to_string(),
                translation_weights: "model-q4k.gguf".to_string(),
                preload_on_startup: false,
            },
            synthesis: SynthesisConfig {
                command: "f5-tts_infer-cli".to_string(),
                speed: None,
                spanish: VoiceProfileConfig {
                    model: "F5TTS_Base".to_string(),
                    ckpt_file: Some(PathBuf::from("models/f5_spanish/model_1200000.safetensors")),
                    vocab_file: Some(PathBuf::from("models/f5_spanish/vocab.txt")),
                },
                base: VoiceProfileConfig {
                    model: "F5TTS_Base".to_string(),
                    ckpt_file: None,
                    vocab_file: None,
                },
            },
            pipeline: PipelineConfig {
                output_dir: PathBuf::from("translate_audio_outputs"),
                output_file_name: "translated_audio.wav".to_string(),
                staging_dir: None,
                reference_mode: ReferenceMode::Transcribe,
                upload_reference_mode: ReferenceMode::Placeholder,
                placeholder_reference_text: DEFAULT_PLACEHOLDER_REFERENCE_TEXT.to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_pipelines: 4,
                max_upload_mb: 100,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_MODELS__WHISPER_MODEL=small`: Override whisper model
    /// - `APP_PIPELINE__UPLOAD_REFERENCE_MODE=transcribe`: Transcribe uploaded references
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - The Whisper size and device preference are recognised
    /// - Model, command and file names are not empty
    /// - At least one pipeline may run and uploads are allowed some size
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        self.models
            .whisper_model
            .parse::<crate::transcription::ModelSize>()
            .map_err(|e| anyhow::anyhow!(e))?;

        self.models
            .device
            .parse::<crate::device::DevicePreference>()
            .map_err(|e| anyhow::anyhow!(e))?;

        if self.models.translation_model.trim().is_empty() {
            return Err(anyhow::anyhow!("Translation model cannot be empty"));
        }

        if self.synthesis.command.trim().is_empty() {
            return Err(anyhow::anyhow!("Synthesis command cannot be empty"));
        }

        for (name, profile) in [("spanish", &self.synthesis.spanish), ("base", &self.synthesis.base)] {
            if profile.model.trim().is_empty() {
                return Err(anyhow::anyhow!("Synthesis profile '{}' needs a model name", name));
            }
        }

        if let Some(speed) = self.synthesis.speed {
            if !(speed > 0.0) {
                return Err(anyhow::anyhow!("Synthesis speed must be positive"));
            }
        }

        if self.pipeline.output_file_name.trim().is_empty()
            || self.pipeline.output_file_name.contains(['/', '\\'])
        {
            return Err(anyhow::anyhow!(
                "Output file name must be a plain file name, got '{}'",
                self.pipeline.output_file_name
            ));
        }

        if self.performance.max_concurrent_pipelines == 0 {
            return Err(anyhow::anyhow!("Max concurrent pipelines must be greater than 0"));
        }

        if self.performance.max_upload_mb == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// Only settings that can change without rebuilding the model registries
    /// or rebinding the server are accepted: the reference-text policy, the
    /// placeholder text and the upload limit. Everything else is ignored.
    ///
    /// ## Partial updates:
    /// `{"pipeline": {"upload_reference_mode": "transcribe"}}` changes only that field.
    /// The update is applied to a copy and only committed if it validates.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;
        let mut updated = self.clone();

        if let Some(pipeline) = partial_config.get("pipeline") {
            if let Some(mode) = pipeline.get("reference_mode").and_then(|v| v.as_str()) {
                updated.pipeline.reference_mode = mode.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            }
            if let Some(mode) = pipeline.get("upload_reference_mode").and_then(|v| v.as_str()) {
                updated.pipeline.upload_reference_mode =
                    mode.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            }
            if let Some(text) = pipeline.get("placeholder_reference_text").and_then(|v| v.as_str()) {
                updated.pipeline.placeholder_reference_text = text.to_string();
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(mb) = performance.get("max_upload_mb").and_then(|v| v.as_u64()) {
                updated.performance.max_upload_mb = mb as usize;
            }
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.pipeline.reference_mode, ReferenceMode::Transcribe);
        assert_eq!(config.pipeline.upload_reference_mode, ReferenceMode::Placeholder);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.whisper_model = "gigantic".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.output_file_name = "../escape.wav".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.max_concurrent_pipelines = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"pipeline": {"upload_reference_mode": "transcribe"}, "performance": {"max_upload_mb": 20}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.pipeline.upload_reference_mode, ReferenceMode::Transcribe);
        assert_eq!(config.performance.max_upload_bytes(), 20 * 1024 * 1024);
        assert_eq!(config.pipeline.reference_mode, ReferenceMode::Transcribe);
    }

    #[test]
    fn test_invalid_update_leaves_config_untouched() {
        let mut config = AppConfig::default();
        let json = r#"{"pipeline": {"reference_mode": "placeholder"}, "performance": {"max_upload_mb": 0}}"#;
        assert!(config.update_from_json(json).is_err());
        assert_eq!(config.pipeline.reference_mode, ReferenceMode::Transcribe);
        assert_eq!(config.performance.max_upload_mb, 100);
    }

    #[test]
    fn test_config_roundtrips_through_config_crate() {
        let built: AppConfig = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(built.synthesis.base.model, "F5TTS_Base");
        assert_eq!(built.synthesis.spanish.vocab_file, AppConfig::default().synthesis.spanish.vocab_file);
    }
}
