//! MADLAD-400 translator using candle quantized T5.
//!
//! Downloads the gguf weights, config and tokenizer from HuggingFace on first
//! use, then runs greedy decoding. The target language is selected with the
//! `<2xx>` prefix token, so one model covers every pair.

use crate::translation::Translator;

use anyhow::{anyhow, bail, Context, Result};
use candle_core::{Device, Tensor, D};
use candle_transformers::models::quantized_t5::{Config as T5Config, T5ForConditionalGeneration};
use candle_transformers::quantized_var_builder::VarBuilder;
use std::sync::Mutex;
use tokenizers::Tokenizer;

/// Lower bound on generated tokens, for very short inputs.
const MIN_DECODE_TOKENS: usize = 64;

/// Upper bound on generated tokens per call.
const MAX_DECODE_TOKENS: usize = 1024;

pub struct MadladTranslator {
    // The decoder keeps a KV cache, so every call needs exclusive access
    model: Mutex<T5ForConditionalGeneration>,
    tokenizer: Tokenizer,
    device: Device,
    decoder_start_token_id: u32,
    eos_token_id: u32,
    repo_id: String,
}

impl MadladTranslator {
    /// Load a quantized MADLAD-400 model from the HuggingFace cache.
    ///
    /// Quantized T5 runs on the CPU.
    pub fn load(repo_id: &str, weights_file: &str) -> Result<Self> {
        tracing::info!(repo = repo_id, weights = weights_file, "Loading translation model");
        let device = Device::Cpu;

        let api = crate::hub::hub_api()?;
        let repo = api.model(repo_id.to_string());
        let model_path = crate::hub::fetch(&repo, repo_id, weights_file)?;
        let config_path = crate::hub::fetch(&repo, repo_id, "config.json")?;
        let tokenizer_path = crate::hub::fetch(&repo, repo_id, "tokenizer.json")?;

        let config_bytes = std::fs::read(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config: T5Config =
            serde_json::from_slice(&config_bytes).context("parsing T5 config")?;

        let vb = VarBuilder::from_gguf(&model_path, &device)
            .with_context(|| format!("loading GGUF weights {}", model_path.display()))?;
        let model = T5ForConditionalGeneration::load(vb, &config).context("initializing T5 model")?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Load tokenizer {}: {e}", tokenizer_path.display()))?;

        Ok(Self {
            model: Mutex::new(model),
            tokenizer,
            device,
            decoder_start_token_id: config.decoder_start_token_id.unwrap_or(config.pad_token_id) as u32,
            eos_token_id: config.eos_token_id as u32,
            repo_id: repo_id.to_string(),
        })
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| anyhow!("Tokenize: {e}"))?;
        let input_ids = encoding.get_ids();
        let input_tensor = Tensor::new(input_ids, &self.device)?.unsqueeze(0)?;
        let max_tokens = (input_ids.len() * 3).clamp(MIN_DECODE_TOKENS, MAX_DECODE_TOKENS);

        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("translation model lock poisoned by an earlier panic"))?;
        model.clear_kv_cache();

        let encoder_output = model.encode(&input_tensor).context("encoder forward")?;

        // Incremental decoding: after the start token only the newest token is fed
        let mut decoded_ids: Vec<u32> = Vec::new();
        let mut next_input = vec![self.decoder_start_token_id];

        for _ in 0..max_tokens {
            let decoder_input = Tensor::new(next_input.as_slice(), &self.device)?.unsqueeze(0)?;
            let logits = model
                .decode(&decoder_input, &encoder_output)
                .context("decoder forward")?
                .squeeze(0)?;
            let next_token = logits.argmax(D::Minus1)?.to_scalar::<u32>()?;

            if next_token == self.eos_token_id {
                break;
            }

            decoded_ids.push(next_token);
            next_input = vec![next_token];
        }

        let output = self
            .tokenizer
            .decode(&decoded_ids, true)
            .map_err(|e| anyhow!("Detokenize: {e}"))?;
        Ok(output.trim().to_string())
    }
}

/// MADLAD selects the output language with a `<2xx>` prefix.
pub fn madlad_prompt(text: &str, target_lang: &str) -> Result<String> {
    let target = target_lang.trim().to_lowercase();
    if target.is_empty() || !target.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        bail!("invalid target language code '{}'", target_lang);
    }
    Ok(format!("<2{}> {}", target, text))
}

impl Translator for MadladTranslator {
    fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }

        let prompt = madlad_prompt(text, target_lang)?;
        let target_token = format!("<2{}>", target_lang.trim().to_lowercase());
        if self.tokenizer.token_to_id(&target_token).is_none() {
            bail!("unsupported target language '{}'", target_lang);
        }

        tracing::debug!(source_lang, target_lang, "Running MADLAD translation");
        self.generate(&prompt)
            .with_context(|| format!("translating {} -> {} with {}", source_lang, target_lang, self.repo_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_prefix() {
        assert_eq!(madlad_prompt("hola mundo", "en").unwrap(), "<2en> hola mundo");
        assert_eq!(madlad_prompt("hello", " ES ").unwrap(), "<2es> hello");
    }

    #[test]
    fn test_prompt_rejects_bad_codes() {
        assert!(madlad_prompt("hello", "").is_err());
        assert!(madlad_prompt("hello", "e s").is_err());
        assert!(madlad_prompt("hello", "<2en>").is_err());
    }

    #[test]
    fn madlad_translator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<MadladTranslator>();
    }
}
