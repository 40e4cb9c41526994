//! # Pipeline Orchestrator
//!
//! Drives transcription → translation → reference preparation → synthesis
//! for one request, recording stage outputs and timings.
//!
//! ## Failure Policy:
//! - Validation, transcription, translation and reference transcription
//!   failures abort the run and propagate unchanged.
//! - Any synthesis-stage failure (model load, output directory, inference)
//!   produces a partial result with the texts gathered so far.

use crate::backends::{ModelKey, ModelRegistries};
use crate::config::AppConfig;
use crate::error::{Capability, InputRole, PipelineError};
use crate::pipeline::artifacts::{ArtifactStore, OutputArtifact};
use crate::pipeline::staging::{StageError, StagedUploads};
use crate::pipeline::types::{
    PipelineRequest, PipelineResult, PipelineRun, PipelineState, ReferenceMode, ReferenceSource, Stage,
};
use crate::synthesis::{SynthesisRouter, VoiceProfile};
use crate::transcription::engine::ensure_input_exists;
use crate::transcription::{ModelSize, Transcript, TranscriptionEngine};
use crate::translation::{Translation, TranslationEngine};
use futures_util::Stream;
use serde::Serialize;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Settings that can change while the server runs.
#[derive(Debug, Clone)]
pub struct ReferenceSettings {
    pub reference_mode: ReferenceMode,
    pub upload_reference_mode: ReferenceMode,
    pub placeholder_reference_text: String,
}

/// Everything the orchestrator needs from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub transcription_model: ModelSize,
    pub translation_model: String,
    pub output_dir: PathBuf,
    pub output_file_name: String,
    pub staging_dir: Option<PathBuf>,
    pub reference: ReferenceSettings,
    pub max_concurrent_pipelines: usize,
    pub max_upload_bytes: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            transcription_model: config
                .models
                .whisper_model
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            translation_model: config.models.translation_model.clone(),
            output_dir: config.pipeline.output_dir.clone(),
            output_file_name: config.pipeline.output_file_name.clone(),
            staging_dir: config.pipeline.staging_dir.clone(),
            reference: ReferenceSettings::from_config(config),
            max_concurrent_pipelines: config.performance.max_concurrent_pipelines,
            max_upload_bytes: config.performance.max_upload_bytes(),
        })
    }
}

impl ReferenceSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            reference_mode: config.pipeline.reference_mode,
            upload_reference_mode: config.pipeline.upload_reference_mode,
            placeholder_reference_text: config.pipeline.placeholder_reference_text.clone(),
        }
    }
}

/// Form fields that accompany uploaded audio.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    pub source_lang: String,
    pub target_lang: String,
    pub synthesis_model_hint: Option<String>,
    pub reference_text: Option<String>,
}

/// One uploaded file: its client-side name and its byte stream.
pub struct Upload<S> {
    pub filename: Option<String>,
    pub stream: S,
}

pub struct UploadRequest<S> {
    pub source_audio: Upload<S>,
    pub reference_audio: Upload<S>,
    pub form: UploadForm,
}

/// Result of a standalone synthesis call.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisOutput {
    pub artifact_id: String,
    pub output_audio_path: String,
    pub synthesis_profile: String,
    pub tts_time: f64,
}

/// Outcome of loading one model during preload.
#[derive(Debug, Clone, Serialize)]
pub struct PreloadOutcome {
    pub capability: Capability,
    pub key: String,
    pub loaded: bool,
    pub seconds: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreloadReport {
    pub models: Vec<PreloadOutcome>,
}

impl PreloadReport {
    pub fn all_loaded(&self) -> bool {
        self.models.iter().all(|m| m.loaded)
    }
}

/// Runs pipelines against shared model registries.
pub struct PipelineOrchestrator {
    registries: ModelRegistries,
    transcription: TranscriptionEngine,
    translation: TranslationEngine,
    synthesis: SynthesisRouter,
    artifacts: ArtifactStore,
    staging_dir: Option<PathBuf>,
    max_upload_bytes: usize,
    reference: RwLock<ReferenceSettings>,
    permits: Semaphore,
}

impl PipelineOrchestrator {
    pub fn new(registries: ModelRegistries, settings: PipelineSettings) -> Self {
        Self {
            transcription: TranscriptionEngine::new(
                registries.transcription.clone(),
                settings.transcription_model,
            ),
            translation: TranslationEngine::new(registries.translation.clone(), settings.translation_model),
            synthesis: SynthesisRouter::new(registries.synthesis.clone()),
            artifacts: ArtifactStore::new(settings.output_dir, settings.output_file_name),
            staging_dir: settings.staging_dir,
            max_upload_bytes: settings.max_upload_bytes,
            reference: RwLock::new(settings.reference),
            permits: Semaphore::new(settings.max_concurrent_pipelines.max(1)),
            registries,
        }
    }

    pub fn registries(&self) -> &ModelRegistries {
        &self.registries
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Pipelines that could start right now without waiting.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn reference_settings(&self) -> ReferenceSettings {
        match self.reference.read() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Apply a runtime configuration change to the reference-text policy.
    pub fn update_reference_settings(&self, settings: ReferenceSettings) {
        let mut guard = match self.reference.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
    }

    /// Start a staging area for a multipart upload.
    pub async fn new_staging(&self, max_upload_bytes: Option<usize>) -> Result<StagedUploads, StageError> {
        StagedUploads::new(
            self.staging_dir.as_deref(),
            max_upload_bytes.unwrap_or(self.max_upload_bytes),
        )
        .await
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, PipelineError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| PipelineError::Unexpected("pipeline semaphore closed".to_string()))
    }

    /// Run the full pipeline on audio already on disk.
    pub async fn run(&self, request: PipelineRequest) -> Result<PipelineResult, PipelineError> {
        let mode = self.reference_settings().reference_mode;
        let _permit = self.acquire().await?;
        self.execute(&request, mode).await
    }

    /// Stage two uploaded streams, then run the pipeline on them.
    ///
    /// The staged files are removed before this returns, on success or failure.
    pub async fn run_uploads<S, B, E>(&self, upload: UploadRequest<S>) -> Result<PipelineResult, PipelineError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let staging_error = |e: StageError| PipelineError::Unexpected(e.to_string());

        let mut staged = self.new_staging(None).await.map_err(staging_error)?;
        staged
            .stage(
                InputRole::SourceAudio,
                upload.source_audio.filename.as_deref(),
                upload.source_audio.stream,
            )
            .await
            .map_err(staging_error)?;
        staged
            .stage(
                InputRole::ReferenceAudio,
                upload.reference_audio.filename.as_deref(),
                upload.reference_audio.stream,
            )
            .await
            .map_err(staging_error)?;

        self.run_staged(staged, upload.form).await
    }

    /// Run the pipeline on uploads already staged, then delete them.
    pub async fn run_staged(&self, staged: StagedUploads, form: UploadForm) -> Result<PipelineResult, PipelineError> {
        let missing = |role: InputRole| PipelineError::MissingInput {
            role,
            location: "upload".to_string(),
        };
        let request = PipelineRequest {
            source_audio: staged
                .source_audio()
                .ok_or_else(|| missing(InputRole::SourceAudio))?
                .to_path_buf(),
            reference_audio: staged
                .reference_audio()
                .ok_or_else(|| missing(InputRole::ReferenceAudio))?
                .to_path_buf(),
            source_lang: form.source_lang,
            target_lang: form.target_lang,
            synthesis_model_hint: form.synthesis_model_hint,
            reference_text: form.reference_text,
        };

        let mode = self.reference_settings().upload_reference_mode;
        let _permit = self.acquire().await?;
        let result = self.execute(&request, mode).await;

        let staging_dir = staged.path().to_path_buf();
        drop(staged);
        tracing::debug!(path = %staging_dir.display(), "Removed staged uploads");
        result
    }

    async fn execute(&self, request: &PipelineRequest, mode: ReferenceMode) -> Result<PipelineResult, PipelineError> {
        let mut run = PipelineRun::start();
        tracing::info!(
            source_audio = %request.source_audio.display(),
            reference_audio = %request.reference_audio.display(),
            source_lang = %request.source_lang,
            target_lang = %request.target_lang,
            reference_mode = %mode,
            "Starting translation pipeline"
        );

        match self.run_text_stages(&mut run, request, mode).await {
            Ok(texts) => Ok(self.run_synthesis_stage(run, request, texts).await),
            Err(err) => {
                run.fail();
                tracing::error!(
                    error = %err,
                    kind = err.kind(),
                    elapsed = run.elapsed().as_secs_f64(),
                    "Pipeline failed"
                );
                Err(err)
            }
        }
    }

    /// Validation through reference preparation. Every failure here is fatal.
    async fn run_text_stages(
        &self,
        run: &mut PipelineRun,
        request: &PipelineRequest,
        mode: ReferenceMode,
    ) -> Result<TextArtifacts, PipelineError> {
        ensure_input_exists(&request.source_audio, InputRole::SourceAudio).await?;
        ensure_input_exists(&request.reference_audio, InputRole::ReferenceAudio).await?;

        run.advance(PipelineState::Transcribing)?;
        let transcript = self
            .transcription
            .transcribe(&request.source_audio, InputRole::SourceAudio)
            .await?;
        run.record(Stage::Transcription, transcript.text.clone(), transcript.duration);

        run.advance(PipelineState::Translating)?;
        let translation = self
            .translation
            .translate(&transcript.text, &request.source_lang, &request.target_lang)
            .await?;
        run.record(Stage::Translation, translation.translated_text.clone(), translation.duration);

        run.advance(PipelineState::PreparingReference)?;
        let reference = self.prepare_reference(request, mode).await?;
        run.record(Stage::ReferencePreparation, reference.text.clone(), reference.duration);

        Ok(TextArtifacts {
            transcript,
            translation,
            reference,
        })
    }

    async fn prepare_reference(
        &self,
        request: &PipelineRequest,
        mode: ReferenceMode,
    ) -> Result<PreparedReference, PipelineError> {
        let start_time = Instant::now();

        if let Some(text) = request.provided_reference_text() {
            return Ok(PreparedReference {
                text: text.to_string(),
                source: ReferenceSource::Provided,
                duration: start_time.elapsed(),
            });
        }

        match mode {
            ReferenceMode::Transcribe => {
                let transcript = self
                    .transcription
                    .transcribe(&request.reference_audio, InputRole::ReferenceAudio)
                    .await?;
                Ok(PreparedReference {
                    text: transcript.text,
                    source: ReferenceSource::Transcribed,
                    duration: transcript.duration,
                })
            }
            ReferenceMode::Placeholder => Ok(PreparedReference {
                text: self.reference_settings().placeholder_reference_text,
                source: ReferenceSource::Placeholder,
                duration: start_time.elapsed(),
            }),
        }
    }

    /// Synthesis never fails the call: errors become a partial result.
    async fn run_synthesis_stage(
        &self,
        mut run: PipelineRun,
        request: &PipelineRequest,
        texts: TextArtifacts,
    ) -> PipelineResult {
        let profile = SynthesisRouter::select(&request.target_lang);
        if let Some(hint) = &request.synthesis_model_hint {
            tracing::info!(
                hint = %hint,
                selected = profile.model_name(),
                "Synthesis model chosen by target language; hint recorded only"
            );
        }

        let outcome = match run.advance(PipelineState::Synthesizing) {
            Ok(()) => self.synthesize_into_artifact(profile, request, &texts).await,
            Err(err) => Err(err),
        };

        let (artifact, tts_time, error) = match outcome {
            Ok((artifact, duration)) => {
                run.record(Stage::Synthesis, artifact.audio_path.display().to_string(), duration);
                match run.advance(PipelineState::Done) {
                    Ok(()) => (Some(artifact), Some(duration.as_secs_f64()), None),
                    Err(err) => (Some(artifact), Some(duration.as_secs_f64()), Some(err.to_string())),
                }
            }
            Err(err) => {
                run.fail();
                tracing::warn!(
                    error = %err,
                    kind = err.kind(),
                    profile = %profile,
                    "Speech synthesis failed; returning partial result"
                );
                (None, None, Some(err.to_string()))
            }
        };

        let total_time = run.elapsed().as_secs_f64();
        let final_state = run.state();
        let TextArtifacts {
            transcript,
            translation,
            reference,
        } = texts;

        if final_state == PipelineState::Done {
            tracing::info!(
                total_time,
                artifact_id = ?artifact.as_ref().map(|a| a.id),
                "Pipeline complete"
            );
        }

        PipelineResult {
            original_audio: request.source_audio.display().to_string(),
            source_lang: request.source_lang.clone(),
            target_lang: request.target_lang.clone(),
            transcribed_text: transcript.text,
            translated_text: translation.translated_text,
            reference_time: (reference.source == ReferenceSource::Transcribed)
                .then(|| reference.duration.as_secs_f64()),
            reference_text: reference.text,
            reference_source: reference.source,
            synthesis_profile: profile.model_name().to_string(),
            synthesis_model_hint: request.synthesis_model_hint.clone(),
            output_audio_path: artifact.as_ref().map(|a| a.audio_path.display().to_string()),
            artifact_id: artifact.as_ref().map(|a| a.id.to_string()),
            transcription_time: transcript.duration.as_secs_f64(),
            translation_time: translation.duration.as_secs_f64(),
            tts_time,
            total_time,
            stages: run.into_stages(),
            final_state,
            error,
        }
    }

    async fn synthesize_into_artifact(
        &self,
        profile: VoiceProfile,
        request: &PipelineRequest,
        texts: &TextArtifacts,
    ) -> Result<(OutputArtifact, Duration), PipelineError> {
        self.synthesize_artifact(
            profile,
            &request.reference_audio,
            &texts.reference.text,
            &texts.translation.translated_text,
        )
        .await
    }

    /// Allocate an artifact and synthesize into it; the directory is removed on failure.
    async fn synthesize_artifact(
        &self,
        profile: VoiceProfile,
        reference_audio: &Path,
        reference_text: &str,
        text: &str,
    ) -> Result<(OutputArtifact, Duration), PipelineError> {
        let artifact = self.artifacts.allocate().await?;
        match self
            .synthesis
            .synthesize(profile, reference_audio, reference_text, text, &artifact.audio_path)
            .await
        {
            Ok(duration) => Ok((artifact, duration)),
            Err(err) => {
                self.artifacts.discard(&artifact).await;
                Err(err)
            }
        }
    }

    /// Transcribe one file.
    pub async fn transcribe(&self, audio_path: &Path) -> Result<Transcript, PipelineError> {
        let _permit = self.acquire().await?;
        self.transcription.transcribe(audio_path, InputRole::SourceAudio).await
    }

    /// Translate one text.
    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Translation, PipelineError> {
        let _permit = self.acquire().await?;
        self.translation.translate(text, source_lang, target_lang).await
    }

    /// Synthesize one text in the voice of `reference_audio`.
    ///
    /// Unlike the full pipeline, failures propagate to the caller.
    pub async fn synthesize(
        &self,
        reference_audio: &Path,
        reference_text: &str,
        text: &str,
        target_lang: &str,
    ) -> Result<SynthesisOutput, PipelineError> {
        ensure_input_exists(reference_audio, InputRole::ReferenceAudio).await?;
        let _permit = self.acquire().await?;

        let profile = SynthesisRouter::select(target_lang);
        let (artifact, duration) = self
            .synthesize_artifact(profile, reference_audio, reference_text, text)
            .await?;

        Ok(SynthesisOutput {
            artifact_id: artifact.id.to_string(),
            output_audio_path: artifact.audio_path.display().to_string(),
            synthesis_profile: profile.model_name().to_string(),
            tts_time: duration.as_secs_f64(),
        })
    }

    /// Force-load every configured model: the Whisper size, the translation
    /// model and every voice profile. Failures are reported, not returned.
    pub async fn preload_all(&self) -> PreloadReport {
        let mut keys = vec![
            ModelKey::Transcription(self.transcription.model_size()),
            ModelKey::Translation(self.translation.model_key().to_string()),
        ];
        keys.extend(VoiceProfile::ALL.into_iter().map(ModelKey::Synthesis));

        let mut models = Vec::with_capacity(keys.len());
        for key in keys {
            models.push(self.reload(&key).await);
        }

        let report = PreloadReport { models };
        tracing::info!(all_loaded = report.all_loaded(), "Model preload finished");
        report
    }

    /// Force-load one model and report how it went.
    pub async fn reload(&self, key: &ModelKey) -> PreloadOutcome {
        let start_time = Instant::now();
        let result = self.registries.force_load(key).await;
        PreloadOutcome {
            capability: key.capability(),
            key: key.to_string(),
            loaded: result.is_ok(),
            seconds: start_time.elapsed().as_secs_f64(),
            error: result.err().map(|e| e.to_string()),
        }
    }

    /// The registry key each capability uses by default.
    pub fn default_key(&self, capability: Capability) -> ModelKey {
        match capability {
            Capability::Transcription => ModelKey::Transcription(self.transcription.model_size()),
            Capability::Translation => ModelKey::Translation(self.translation.model_key().to_string()),
            Capability::Synthesis => ModelKey::Synthesis(VoiceProfile::Base),
        }
    }
}

struct PreparedReference {
    text: String,
    source: ReferenceSource,
    duration: Duration,
}

struct TextArtifacts {
    transcript: Transcript,
    translation: Translation,
    reference: PreparedReference,
}
