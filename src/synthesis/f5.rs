//! F5-TTS voice cloning through the `f5-tts_infer-cli` tool.
//!
//! "Loading" a profile means resolving the executable and checking that the
//! profile's checkpoint and vocabulary files exist, so configuration problems
//! surface as load errors rather than at the first synthesis.

use crate::config::{SynthesisConfig, VoiceProfileConfig};
use crate::synthesis::{VoiceProfile, VoiceSynthesizer};

use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// How much of the tool's stderr is kept in error messages.
const STDERR_TAIL_CHARS: usize = 2000;

pub struct F5CliSynthesizer {
    executable: PathBuf,
    profile: VoiceProfile,
    settings: VoiceProfileConfig,
    speed: Option<f32>,
}

impl F5CliSynthesizer {
    /// Resolve everything `profile` needs to run.
    pub fn load(config: &SynthesisConfig, profile: VoiceProfile) -> Result<Self> {
        let settings = match profile {
            VoiceProfile::Spanish => config.spanish.clone(),
            VoiceProfile::Base => config.base.clone(),
        };

        let executable = resolve_executable(&config.command)?;
        for (label, file) in [("checkpoint", &settings.ckpt_file), ("vocabulary", &settings.vocab_file)] {
            if let Some(file) = file {
                if !file.is_file() {
                    bail!("{} {} file not found: {}", profile.model_name(), label, file.display());
                }
            }
        }

        tracing::info!(
            profile = %profile,
            executable = %executable.display(),
            model = %settings.model,
            "Voice synthesis profile ready"
        );

        Ok(Self {
            executable,
            profile,
            settings,
            speed: config.speed,
        })
    }

    pub fn profile(&self) -> VoiceProfile {
        self.profile
    }

    fn command(&self, ref_audio: &Path, ref_text: &str, gen_text: &str, output_path: &Path) -> Result<Command> {
        let output_dir = output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| anyhow!("output path {} has no directory", output_path.display()))?;
        let output_file = output_path
            .file_name()
            .ok_or_else(|| anyhow!("output path {} has no file name", output_path.display()))?;

        let mut command = Command::new(&self.executable);
        command
            .arg("--model")
            .arg(&self.settings.model)
            .arg("--ref_audio")
            .arg(ref_audio)
            .arg("--ref_text")
            .arg(ref_text)
            .arg("--gen_text")
            .arg(gen_text)
            .arg("--output_dir")
            .arg(output_dir)
            .arg("--output_file")
            .arg(output_file);

        if let Some(ckpt) = &self.settings.ckpt_file {
            command.arg("--ckpt_file").arg(ckpt);
        }
        if let Some(vocab) = &self.settings.vocab_file {
            command.arg("--vocab_file").arg(vocab);
        }
        if let Some(speed) = self.speed {
            command.arg("--speed").arg(speed.to_string());
        }

        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        Ok(command)
    }
}

impl VoiceSynthesizer for F5CliSynthesizer {
    fn infer(&self, ref_audio: &Path, ref_text: &str, gen_text: &str, output_path: &Path) -> Result<()> {
        let mut command = self.command(ref_audio, ref_text, gen_text, output_path)?;
        tracing::debug!(profile = %self.profile, command = ?command, "Running synthesis tool");

        let output = command
            .output()
            .with_context(|| format!("starting {}", self.executable.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                self.profile.model_name(),
                output.status,
                tail(stderr.trim(), STDERR_TAIL_CHARS)
            );
        }

        if !output_path.is_file() {
            bail!(
                "{} finished but wrote no audio to {}",
                self.profile.model_name(),
                output_path.display()
            );
        }

        Ok(())
    }
}

/// Find `command` on PATH, or accept it as a path if it contains a separator.
fn resolve_executable(command: &str) -> Result<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return if candidate.is_file() {
            Ok(candidate.to_path_buf())
        } else {
            Err(anyhow!("synthesis tool not found at {}", candidate.display()))
        };
    }

    let path_var = env::var_os("PATH").ok_or_else(|| anyhow!("PATH is not set"))?;
    for dir in env::split_paths(&path_var) {
        let full = dir.join(command);
        if full.is_file() {
            return Ok(full);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{command}.exe"));
            if exe.is_file() {
                return Ok(exe);
            }
        }
    }
    Err(anyhow!("synthesis tool '{}' not found in PATH", command))
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    let start = text.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(0);
    &text[start..]
}
