//! # Whisper Model Management
//!
//! Loads Whisper checkpoints from HuggingFace with Candle-rs and runs
//! greedy decoding over 30 second mel segments.
//!
//! ## Model Loading Process:
//! 1. Download config, tokenizer and safetensors weights (cached locally)
//! 2. Build the mel filter bank for the model's mel bin count
//! 3. Initialize model weights on the requested device
//! 4. Run the encoder once on silence so device problems surface at load time
//!
//! ## Thread Safety:
//! The decoder keeps a cross-attention cache, so inference needs `&mut`.
//! The model sits behind a `Mutex`; one transcription runs per loaded handle.

use crate::transcription::audio::{load_audio, WHISPER_SAMPLE_RATE};
use crate::transcription::Transcriber;
use anyhow::{anyhow, bail, Context, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;

/// Available Whisper model sizes with their characteristics.
///
/// ## Trade-offs:
/// - **Size vs Accuracy**: Larger models are more accurate but slower
/// - **Turbo**: large-v3 encoder with a pruned decoder, near-large accuracy at medium cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
    Turbo,
}

impl ModelSize {
    pub const ALL: [ModelSize; 6] = [
        ModelSize::Tiny,
        ModelSize::Base,
        ModelSize::Small,
        ModelSize::Medium,
        ModelSize::Large,
        ModelSize::Turbo,
    ];

    /// Get the HuggingFace model repository name.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v3",
            ModelSize::Turbo => "openai/whisper-large-v3-turbo",
        }
    }

    /// Get the approximate model size in MB.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelSize::Tiny => 39,
            ModelSize::Base => 74,
            ModelSize::Small => 244,
            ModelSize::Medium => 769,
            ModelSize::Large => 1550,
            ModelSize::Turbo => 809,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "Fastest, basic accuracy",
            ModelSize::Base => "Fast, good for testing",
            ModelSize::Small => "Balanced speed and accuracy",
            ModelSize::Medium => "Good accuracy, handles technical vocabulary",
            ModelSize::Large => "Best accuracy, slower processing",
            ModelSize::Turbo => "Near-large accuracy with a fast decoder",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" | "large-v3" => Ok(ModelSize::Large),
            "turbo" | "large-v3-turbo" => Ok(ModelSize::Turbo),
            _ => Err(format!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
            ModelSize::Turbo => "turbo",
        };
        write!(f, "{}", name)
    }
}

/// Languages considered during automatic language detection.
const DETECTABLE_LANGUAGES: &[&str] = &[
    "en", "es", "fr", "de", "it", "pt", "nl", "ca", "ru", "uk", "pl", "cs", "ro", "sv", "tr",
    "el", "ar", "he", "hi", "ja", "ko", "zh", "vi", "id", "th",
];

/// Token ids resolved from the tokenizer vocabulary at load time.
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    no_timestamps: u32,
    languages: Vec<(&'static str, u32)>,
}

impl SpecialTokens {
    fn resolve(tokenizer: &Tokenizer) -> Result<Self> {
        let id = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| anyhow!("tokenizer has no {} token", token))
        };

        let languages = DETECTABLE_LANGUAGES
            .iter()
            .filter_map(|code| {
                tokenizer
                    .token_to_id(&format!("<|{}|>", code))
                    .map(|token| (*code, token))
            })
            .collect();

        Ok(Self {
            sot: id(m::SOT_TOKEN)?,
            eot: id(m::EOT_TOKEN)?,
            transcribe: id(m::TRANSCRIBE_TOKEN)?,
            no_timestamps: id(m::NO_TIMESTAMPS_TOKEN)?,
            languages,
        })
    }
}

/// A loaded Whisper model ready for transcription.
pub struct WhisperModel {
    model: Mutex<m::model::Whisper>,
    config: Config,
    device: Device,
    size: ModelSize,
    tokenizer: Tokenizer,
    tokens: SpecialTokens,
    mel_filters: Vec<f32>,
}

impl WhisperModel {
    /// Load a Whisper model from HuggingFace onto `device`.
    ///
    /// ## Returns:
    /// - **Ok(WhisperModel)**: Model loaded and the encoder ran on `device`
    /// - **Err(anyhow::Error)**: Download, weight loading or the device check failed
    pub fn load(size: ModelSize, device: Device) -> Result<Self> {
        tracing::info!(model = %size, repo = size.repo_name(), "Loading Whisper model");
        let start_time = std::time::Instant::now();

        let api = crate::hub::hub_api()?;
        let repo = api.model(size.repo_name().to_string());
        let config_filename = crate::hub::fetch(&repo, size.repo_name(), "config.json")?;
        let tokenizer_filename = crate::hub::fetch(&repo, size.repo_name(), "tokenizer.json")?;
        let model_filename = crate::hub::fetch(&repo, size.repo_name(), "model.safetensors")?;

        let config: Config = serde_json::from_reader(std::fs::File::open(&config_filename)?)
            .context("parsing Whisper config.json")?;
        let tokenizer = Tokenizer::from_file(&tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let tokens = SpecialTokens::resolve(&tokenizer)?;
        let mel_filters = mel_filter_bank(config.num_mel_bins, m::N_FFT, WHISPER_SAMPLE_RATE);

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_filename], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let whisper = Self {
            model: Mutex::new(model),
            config,
            device,
            size,
            tokenizer,
            tokens,
            mel_filters,
        };
        whisper.validate()?;

        tracing::info!(
            model = %size,
            seconds = start_time.elapsed().as_secs_f64(),
            "Whisper model loaded"
        );
        Ok(whisper)
    }

    pub fn size(&self) -> ModelSize {
        self.size
    }

    /// Run the encoder on one second of silence.
    fn validate(&self) -> Result<()> {
        let mel = self.mel_tensor(&vec![0.0f32; WHISPER_SAMPLE_RATE as usize])?;
        let mut model = self.lock_model()?;
        model
            .encoder
            .forward(&mel, true)
            .context("Whisper encoder failed on the selected device")?;
        Ok(())
    }

    fn lock_model(&self) -> Result<std::sync::MutexGuard<'_, m::model::Whisper>> {
        self.model
            .lock()
            .map_err(|_| anyhow!("Whisper model lock poisoned by an earlier panic"))
    }

    fn mel_tensor(&self, pcm: &[f32]) -> Result<Tensor> {
        let mel = m::audio::pcm_to_mel(&self.config, pcm, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let mel_len = mel.len() / n_mels;
        Ok(Tensor::from_vec(mel, (1, n_mels, mel_len), &self.device)?)
    }

    /// Transcribe 16kHz mono samples.
    ///
    /// The audio is cut into 30 second windows; each window is decoded with
    /// the language detected on the first one.
    pub fn transcribe_samples(&self, pcm: &[f32]) -> Result<String> {
        if pcm.is_empty() {
            bail!("Audio data is empty");
        }

        let mel = self.mel_tensor(pcm)?;
        let (_, _, mel_len) = mel.dims3()?;
        let content_frames = (pcm.len() / m::HOP_LENGTH).clamp(1, mel_len);

        let mut model = self.lock_model()?;
        let first_window = mel.narrow(2, 0, content_frames.min(m::N_FRAMES))?;
        let language = self.detect_language(&mut model, &first_window)?;

        let mut segments = Vec::new();
        let mut seek = 0;
        while seek < content_frames {
            let segment_size = usize::min(content_frames - seek, m::N_FRAMES);
            let mel_segment = mel.narrow(2, seek, segment_size)?;
            let text = self.decode_segment(&mut model, &mel_segment, language)?;
            tracing::debug!(seek, segment_size, text = %text, "Decoded segment");
            if !text.is_empty() {
                segments.push(text);
            }
            seek += segment_size;
        }

        Ok(segments.join(" "))
    }

    fn detect_language(&self, model: &mut m::model::Whisper, mel: &Tensor) -> Result<Option<u32>> {
        if self.tokens.languages.is_empty() {
            return Ok(None);
        }

        let audio_features = model.encoder.forward(mel, true)?;
        let tokens = Tensor::new(&[[self.tokens.sot]], &self.device)?;
        let ys = model.decoder.forward(&tokens, &audio_features, true)?;
        let logits: Vec<f32> = model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?.to_vec1()?;

        let best = self
            .tokens
            .languages
            .iter()
            .filter_map(|(code, id)| logits.get(*id as usize).map(|score| (*code, *id, *score)))
            .max_by(|a, b| a.2.total_cmp(&b.2));

        if let Some((code, _, _)) = best {
            tracing::debug!(language = code, "Detected spoken language");
        }
        Ok(best.map(|(_, id, _)| id))
    }

    fn decode_segment(
        &self,
        model: &mut m::model::Whisper,
        mel: &Tensor,
        language: Option<u32>,
    ) -> Result<String> {
        let audio_features = model.encoder.forward(mel, true)?;

        let mut tokens = vec![self.tokens.sot];
        if let Some(language) = language {
            tokens.push(language);
        }
        tokens.push(self.tokens.transcribe);
        tokens.push(self.tokens.no_timestamps);
        let prompt_len = tokens.len();

        let sample_len = self.config.max_target_positions / 2;
        for i in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = model.decoder.forward(&tokens_t, &audio_features, i == 0)?;
            let (_, seq_len, _) = ys.dims3()?;
            let logits = model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let next_token = logits.argmax(D::Minus1)?.to_scalar::<u32>()?;

            if next_token == self.tokens.eot || tokens.len() >= self.config.max_target_positions {
                break;
            }

            if is_repetitive(&tokens[prompt_len..], next_token) {
                tracing::warn!("Stopping decode on repeated tokens");
                break;
            }

            tokens.push(next_token);
        }

        self.decode_tokens(&tokens[prompt_len..])
    }

    fn decode_tokens(&self, tokens: &[u32]) -> Result<String> {
        let text = self
            .tokenizer
            .decode(tokens, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;
        Ok(text.trim().to_string())
    }
}

impl Transcriber for WhisperModel {
    fn transcribe(&self, audio_path: &Path) -> Result<String> {
        let audio = load_audio(audio_path)?;
        self.transcribe_samples(&audio.samples)
            .with_context(|| format!("running Whisper {} on {}", self.size, audio_path.display()))
    }
}

/// Check whether appending `new_token` would loop the decoder.
fn is_repetitive(tokens: &[u32], new_token: u32) -> bool {
    if tokens.len() < 6 {
        return false;
    }

    if tokens[tokens.len() - 3..] == [new_token, new_token, new_token] {
        return true;
    }

    let last_3 = &tokens[tokens.len() - 3..];
    let prev_3 = &tokens[tokens.len() - 6..tokens.len() - 3];
    last_3 == prev_3
}

fn hz_to_mel(hz: f64) -> f64 {
    // Slaney scale: linear below 1kHz, logarithmic above
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f64.ln() / 27.0;
    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f64.ln() / 27.0;
    if mel >= min_log_mel {
        MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * F_SP
    }
}

/// Slaney-normalized triangular mel filters, row-major `[n_mels][n_fft / 2 + 1]`.
///
/// Matches the filters Whisper was trained with (librosa defaults).
pub fn mel_filter_bank(n_mels: usize, n_fft: usize, sample_rate: u32) -> Vec<f32> {
    let n_bins = n_fft / 2 + 1;
    let nyquist = sample_rate as f64 / 2.0;

    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let mel_max = hz_to_mel(nyquist);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0.0f32; n_mels * n_bins];
    for m in 0..n_mels {
        let (left, center, right) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
        let enorm = 2.0 / (right - left);
        for (k, &freq) in fft_freqs.iter().enumerate() {
            let lower = (freq - left) / (center - left);
            let upper = (right - freq) / (right - center);
            let weight = lower.min(upper).max(0.0) * enorm;
            filters[m * n_bins + k] = weight as f32;
        }
    }
    filters
}
