//! Request, state and result types for one pipeline invocation.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub use crate::config::ReferenceMode;

/// Everything needed to run the pipeline on audio that is already on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Speech to transcribe and translate
    pub source_audio: PathBuf,
    /// Voice sample to clone
    pub reference_audio: PathBuf,
    pub source_lang: String,
    pub target_lang: String,
    /// Caller's preferred synthesis model. Logged; routing is by target language.
    #[serde(default)]
    pub synthesis_model_hint: Option<String>,
    /// Transcript of `reference_audio`, if the caller already has one
    #[serde(default)]
    pub reference_text: Option<String>,
}

impl PipelineRequest {
    /// The pre-supplied reference transcript, ignoring blank strings.
    pub fn provided_reference_text(&self) -> Option<&str> {
        self.reference_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

/// Stages that produce output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transcription,
    Translation,
    ReferencePreparation,
    Synthesis,
}

/// Output of one executed stage. Appended once, never changed.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: Stage,
    pub output: String,
    pub elapsed_seconds: f64,
}

/// Where the reference transcript came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSource {
    Provided,
    Transcribed,
    Placeholder,
}

/// Pipeline state machine.
///
/// ## State Transitions:
/// Validating → Transcribing → Translating → PreparingReference → Synthesizing → Done
/// Any non-terminal state → Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Validating,
    Transcribing,
    Translating,
    PreparingReference,
    Synthesizing,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Validating, Transcribing)
            | (Transcribing, Translating)
            | (Translating, PreparingReference)
            | (PreparingReference, Synthesizing)
            | (Synthesizing, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Validating => "validating",
            PipelineState::Transcribing => "transcribing",
            PipelineState::Translating => "translating",
            PipelineState::PreparingReference => "preparing_reference",
            PipelineState::Synthesizing => "synthesizing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks state, stage outputs and wall-clock time for one invocation.
#[derive(Debug)]
pub struct PipelineRun {
    state: PipelineState,
    started: Instant,
    stages: Vec<StageResult>,
}

impl PipelineRun {
    pub fn start() -> Self {
        Self {
            state: PipelineState::Validating,
            started: Instant::now(),
            stages: Vec::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn advance(&mut self, next: PipelineState) -> Result<(), PipelineError> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::Unexpected(format!(
                "illegal pipeline transition {} -> {}",
                self.state, next
            )));
        }
        tracing::debug!(from = %self.state, to = %next, "Pipeline state change");
        self.state = next;
        Ok(())
    }

    /// Move to `Failed`. A no-op once the run is terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            tracing::debug!(from = %self.state, "Pipeline failed");
            self.state = PipelineState::Failed;
        }
    }

    pub fn record(&mut self, stage: Stage, output: impl Into<String>, elapsed: Duration) {
        self.stages.push(StageResult {
            stage,
            output: output.into(),
            elapsed_seconds: elapsed.as_secs_f64(),
        });
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn into_stages(self) -> Vec<StageResult> {
        self.stages
    }
}

/// Outcome of a pipeline invocation.
///
/// A run that failed during synthesis still produces a result: the texts
/// and timings gathered so far, `error` set and no output audio.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub original_audio: String,
    pub source_lang: String,
    pub target_lang: String,
    pub transcribed_text: String,
    pub translated_text: String,
    pub reference_text: String,
    pub reference_source: ReferenceSource,
    pub synthesis_profile: String,
    pub synthesis_model_hint: Option<String>,
    pub output_audio_path: Option<String>,
    pub artifact_id: Option<String>,
    pub transcription_time: f64,
    pub translation_time: f64,
    pub reference_time: Option<f64>,
    pub tts_time: Option<f64>,
    pub total_time: f64,
    pub stages: Vec<StageResult>,
    pub final_state: PipelineState,
    pub error: Option<String>,
}

impl PipelineResult {
    /// True when the texts are present but synthesis failed.
    pub fn is_partial(&self) -> bool {
        self.final_state == PipelineState::Failed
    }

    /// Sum of the recorded stage times.
    pub fn stage_time_sum(&self) -> f64 {
        self.stages.iter().map(|s| s.elapsed_seconds).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut run = PipelineRun::start();
        for next in [
            PipelineState::Transcribing,
            PipelineState::Translating,
            PipelineState::PreparingReference,
            PipelineState::Synthesizing,
            PipelineState::Done,
        ] {
            run.advance(next).unwrap();
        }
        assert_eq!(run.state(), PipelineState::Done);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut run = PipelineRun::start();
        assert!(run.advance(PipelineState::Synthesizing).is_err());
        assert_eq!(run.state(), PipelineState::Validating);

        assert!(!PipelineState::Done.can_transition_to(PipelineState::Failed));
        assert!(PipelineState::Translating.can_transition_to(PipelineState::Failed));
    }

    #[test]
    fn test_fail_is_sticky() {
        let mut run = PipelineRun::start();
        run.advance(PipelineState::Transcribing).unwrap();
        run.fail();
        assert_eq!(run.state(), PipelineState::Failed);
        assert!(run.advance(PipelineState::Translating).is_err());
        run.fail();
        assert_eq!(run.state(), PipelineState::Failed);
    }

    #[test]
    fn test_blank_reference_text_is_ignored() {
        let mut request = PipelineRequest {
            source_audio: "a.wav".into(),
            reference_audio: "b.wav".into(),
            source_lang: "es".into(),
            target_lang: "en".into(),
            synthesis_model_hint: None,
            reference_text: Some("   ".into()),
        };
        assert_eq!(request.provided_reference_text(), None);
        request.reference_text = Some(" hola ".into());
        assert_eq!(request.provided_reference_text(), Some("hola"));
    }

    #[test]
    fn test_request_deserializes_without_optional_fields() {
        let request: PipelineRequest = serde_json::from_str(
            r#"{"source_audio":"a.wav","reference_audio":"b.wav","source_lang":"es","target_lang":"en"}"#,
        )
        .unwrap();
        assert!(request.synthesis_model_hint.is_none());
        assert!(request.reference_text.is_none());
    }
}
