//! # Error Handling
//!
//! Two layers of errors live here:
//!
//! - **PipelineError**: the domain taxonomy produced by the pipeline core,
//!   the model registries and the capability adapters.
//! - **AppError**: what the HTTP layer returns. Every variant maps to a status
//!   code and the JSON error envelope used by all endpoints.
//!
//! ## Propagation Policy:
//! Transcription and translation failures abort the pipeline immediately.
//! Synthesis failures never reach this module as errors: the orchestrator
//! turns them into a partial result instead.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Which of the two request inputs an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRole {
    /// The speech that gets transcribed and translated
    SourceAudio,
    /// The voice sample the synthesizer clones
    ReferenceAudio,
}

impl fmt::Display for InputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRole::SourceAudio => write!(f, "source audio"),
            InputRole::ReferenceAudio => write!(f, "voice reference audio"),
        }
    }
}

/// The three inference capabilities the pipeline depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Transcription,
    Translation,
    Synthesis,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Transcription => "transcription",
            Capability::Translation => "translation",
            Capability::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "transcription" | "whisper" | "stt" => Ok(Capability::Transcription),
            "translation" | "translate" | "mt" => Ok(Capability::Translation),
            "synthesis" | "tts" => Ok(Capability::Synthesis),
            _ => Err(format!("Unknown capability: {}", s)),
        }
    }
}

/// Errors produced by the pipeline core.
///
/// Capability failures carry the provider's `anyhow::Error` untouched so the
/// full context chain is preserved; `{:#}` renders the chain on one line.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A referenced audio input does not exist. Raised before any model work.
    #[error("The {role} does not exist: {location}")]
    MissingInput { role: InputRole, location: String },

    /// A model failed to initialize (unsupported device, missing weights...)
    #[error("Failed to load {capability} model '{key}': {message}")]
    CapabilityLoad {
        capability: Capability,
        key: String,
        message: String,
    },

    #[error("Transcription failed: {0:#}")]
    Transcription(anyhow::Error),

    #[error("Translation failed: {0:#}")]
    Translation(anyhow::Error),

    #[error("Speech synthesis failed: {0:#}")]
    Synthesis(anyhow::Error),

    /// Anything else: worker pool failures, I/O while staging or writing output
    #[error("Unexpected pipeline error: {0}")]
    Unexpected(String),
}

impl PipelineError {
    /// Short machine-readable name, used in logs and the HTTP error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MissingInput { .. } => "missing_input",
            PipelineError::CapabilityLoad { .. } => "capability_load_error",
            PipelineError::Transcription(_) => "transcription_error",
            PipelineError::Translation(_) => "translation_error",
            PipelineError::Synthesis(_) => "synthesis_error",
            PipelineError::Unexpected(_) => "unexpected_error",
        }
    }

    /// Wrap a failed `spawn_blocking` join.
    pub fn worker(err: tokio::task::JoinError) -> Self {
        PipelineError::Unexpected(format!("blocking worker failed: {}", err))
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Unexpected(format!("I/O error: {}", err))
    }
}

/// Custom error types for the HTTP layer.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500)
/// - **BadRequest**: Client sent invalid data (400)
/// - **NotFound**: Requested resource or input file doesn't exist (404)
/// - **ConfigError**: Configuration problems (500)
/// - **ValidationError**: Data validation failed (400)
/// - **Capability**: An inference engine failed (500, typed by `kind`)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    ConfigError(String),
    ValidationError(String),
    Capability { kind: &'static str, message: String },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Capability { message, .. } => write!(f, "Model error: {}", message),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) | AppError::ConfigError(_) | AppError::Capability { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// All errors share one envelope:
    /// ```json
    /// { "error": { "type": "missing_input", "message": "...", "timestamp": "..." } }
    /// ```
    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg.clone()),
            AppError::BadRequest(msg) => ("bad_request", msg.clone()),
            AppError::NotFound(msg) => ("not_found", msg.clone()),
            AppError::ConfigError(msg) => ("config_error", msg.clone()),
            AppError::ValidationError(msg) => ("validation_error", msg.clone()),
            AppError::Capability { kind, message } => (*kind, message.clone()),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Pipeline errors become client-actionable messages for missing inputs and
/// generic server faults for everything else. Only the string description of
/// a capability error leaves the process.
impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match &err {
            PipelineError::MissingInput { .. } => AppError::NotFound(err.to_string()),
            PipelineError::Unexpected(_) => AppError::Internal(err.to_string()),
            _ => AppError::Capability {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid multipart upload: {}", err))
    }
}

/// Upload problems are the client's fault unless the disk failed.
impl From<crate::pipeline::StageError> for AppError {
    fn from(err: crate::pipeline::StageError) -> Self {
        match err {
            crate::pipeline::StageError::Io(e) => AppError::Internal(format!("Staging failed: {}", e)),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
