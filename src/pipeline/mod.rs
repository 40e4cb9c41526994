//! # Pipeline Module
//!
//! Speech-to-speech translation: transcribe the source audio, translate the
//! text, obtain a transcript of the voice reference, then synthesize the
//! translation in the reference voice.
//!
//! ## Key Components:
//! - **PipelineOrchestrator**: runs the stages and owns the failure policy
//! - **types**: request, state machine and result types
//! - **ArtifactStore**: one uuid directory per synthesized file
//! - **StagedUploads**: request-scoped temp files for uploaded audio

pub mod artifacts;
pub mod orchestrator;
pub mod staging;
pub mod types;

pub use artifacts::{ArtifactStore, OutputArtifact};
pub use orchestrator::{
    PipelineOrchestrator, PipelineSettings, PreloadOutcome, PreloadReport, ReferenceSettings, SynthesisOutput,
    Upload, UploadForm, UploadRequest,
};
pub use staging::{StageError, StagedUploads};
pub use types::{
    PipelineRequest, PipelineResult, PipelineRun, PipelineState, ReferenceMode, ReferenceSource, Stage, StageResult,
};
